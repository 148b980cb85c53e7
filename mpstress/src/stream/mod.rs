//! Line-oriented decoding of the helper's JSON output
//!
//! Every line is handled on its own: a malformed record, an unparsable report
//! line or a failed write is logged and counted, and the loop moves on. The
//! loop only ends when the helper closes its stdout or the read itself fails.

use crate::error::CollectorError;
use crate::report::{ReportParser, ReportRecord};
use crate::writer::MetricWriter;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tracing::{debug, error};

/// Longest helper line accepted, newline included
pub const MAX_LINE_LEN: u64 = 64 * 1024;

/// Counters describing one decode run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodeStats {
    pub lines: u64,
    pub records: u64,
    pub samples_written: u64,
    pub decode_errors: u64,
    pub parse_errors: u64,
    pub write_errors: u64,
}

impl DecodeStats {
    pub fn errors(&self) -> u64 {
        self.decode_errors + self.parse_errors + self.write_errors
    }
}

/// Decodes helper records and hands data lines to the writer
pub struct StreamDecoder {
    parser: ReportParser,
    writer: MetricWriter,
    stats: DecodeStats,
}

impl StreamDecoder {
    pub fn new(writer: MetricWriter) -> Self {
        Self {
            parser: ReportParser::new(),
            writer,
            stats: DecodeStats::default(),
        }
    }

    /// Consume `reader` until end of stream
    pub async fn run<R>(mut self, reader: R) -> DecodeStats
    where
        R: AsyncRead + Unpin,
    {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();

        loop {
            buf.clear();
            match (&mut reader).take(MAX_LINE_LEN).read_until(b'\n', &mut buf).await {
                Ok(0) => {
                    debug!("helper output closed");
                    break;
                }
                Ok(_) if is_truncated(&buf) => {
                    self.stats.lines += 1;
                    self.stats.decode_errors += 1;
                    error!("{}", CollectorError::LineTooLong { limit: MAX_LINE_LEN });
                    if let Err(e) = skip_line(&mut reader, &mut buf).await {
                        error!("error while reading helper output: {}", e);
                        break;
                    }
                }
                Ok(_) => {
                    self.stats.lines += 1;
                    self.handle_line(&buf).await;
                }
                Err(e) => {
                    error!("error while reading helper output: {}", e);
                    break;
                }
            }
        }

        self.stats
    }

    /// Decode and process a single raw line
    pub async fn handle_line(&mut self, raw: &[u8]) {
        let record: ReportRecord = match serde_json::from_slice(raw) {
            Ok(record) => record,
            Err(source) => {
                self.stats.decode_errors += 1;
                let line = String::from_utf8_lossy(raw).trim_end().to_string();
                error!("{}", CollectorError::Decode { line, source });
                return;
            }
        };
        self.stats.records += 1;

        let samples = match self.parser.parse(&record) {
            Ok(samples) => samples,
            Err(e) => {
                self.stats.parse_errors += 1;
                error!("{}", e);
                return;
            }
        };

        // Each metric is written independently of its siblings
        for sample in &samples {
            match self.writer.append(sample).await {
                Ok(()) => self.stats.samples_written += 1,
                Err(e) => {
                    self.stats.write_errors += 1;
                    error!("{}", e);
                }
            }
        }
    }
}

fn is_truncated(buf: &[u8]) -> bool {
    buf.len() as u64 >= MAX_LINE_LEN && buf.last() != Some(&b'\n')
}

/// Discard the rest of an oversized line
async fn skip_line<R>(reader: &mut BufReader<R>, buf: &mut Vec<u8>) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
{
    loop {
        buf.clear();
        let n = (&mut *reader).take(MAX_LINE_LEN).read_until(b'\n', buf).await?;
        if n == 0 || buf.last() == Some(&b'\n') {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn json_line(host: &str, stream: &str, body: &str) -> String {
        let value = serde_json::json!({ "Body": body, "Host": host, "Stream": stream });
        format!("{}\n", value)
    }

    fn read(path: std::path::PathBuf) -> String {
        std::fs::read_to_string(path).unwrap()
    }

    #[tokio::test]
    async fn test_full_report_stream() {
        let tmp = TempDir::new().unwrap();
        let decoder = StreamDecoder::new(MetricWriter::new(tmp.path()));

        let mut input = String::new();
        input += &json_line("node1", "stdout", "Linux 5.4.0 (node1) \t01/01/25\t_x86_64_\t(4 CPU)\n");
        input += &json_line("node1", "stdout", "\n");
        input += &json_line("node1", "stdout", "08:15:00     CPU    %usr   %nice    %sys %iowait    %irq   %soft  %steal  %guest  %gnice   %idle\n");
        input += &json_line("node1", "stdout", "08:15:01     all    3.00    0.00    1.50    0.25    0.00    0.00    0.00    0.00    0.00   95.25\n");
        input += &json_line("node1", "stderr", "ssh: warning\n");
        input += &json_line("node2", "stdout", "08:15:01     all    1.00    0.00    1.00    0.00    0.00    0.00    0.00    0.00    0.00   98.00\n");
        input += &json_line("node1", "stdout", "08:15:02     all    5.00    0.00    2.00    1.00    0.00    0.00    0.00    0.00    0.00   92.00\n");

        let stats = decoder.run(input.as_bytes()).await;

        assert_eq!(stats.lines, 7);
        assert_eq!(stats.records, 7);
        assert_eq!(stats.samples_written, 15);
        assert_eq!(stats.errors(), 0);

        assert_eq!(read(tmp.path().join("node1/usr")), "08:15:01 3.00\n08:15:02 5.00\n");
        assert_eq!(read(tmp.path().join("node1/sys")), "08:15:01 1.50\n08:15:02 2.00\n");
        assert_eq!(read(tmp.path().join("node1/iowait")), "08:15:01 0.25\n08:15:02 1.00\n");
        assert_eq!(read(tmp.path().join("node1/idle")), "08:15:01 95.25\n08:15:02 92.00\n");
        assert_eq!(read(tmp.path().join("node1/total")), "08:15:01 4.75\n08:15:02 8\n");
        assert_eq!(read(tmp.path().join("node2/total")), "08:15:01 2\n");
    }

    #[tokio::test]
    async fn test_malformed_json_does_not_stop_stream() {
        let tmp = TempDir::new().unwrap();
        let decoder = StreamDecoder::new(MetricWriter::new(tmp.path()));

        let mut input = String::from("{\"Body\": \"08:15:01 all\n");
        input += "not json at all\n";
        input += &json_line("node1", "stdout", "08:15:01 all 3.00 0.00 1.50 0.25 0.00 0.00 0.00 0.00 0.00 95.25\n");

        let stats = decoder.run(input.as_bytes()).await;

        assert_eq!(stats.decode_errors, 2);
        assert_eq!(stats.records, 1);
        assert_eq!(stats.samples_written, 5);
        assert_eq!(read(tmp.path().join("node1/idle")), "08:15:01 95.25\n");
    }

    #[tokio::test]
    async fn test_stderr_only_writes_nothing() {
        let tmp = TempDir::new().unwrap();
        let decoder = StreamDecoder::new(MetricWriter::new(tmp.path().join("out")));

        let input = json_line("node1", "stderr", "08:15:01 all 3.00 0.00 1.50 0.25 0.00 0.00 0.00 0.00 0.00 95.25\n");
        let stats = decoder.run(input.as_bytes()).await;

        assert_eq!(stats.records, 1);
        assert_eq!(stats.samples_written, 0);
        assert_eq!(stats.errors(), 0);
        assert!(!tmp.path().join("out").exists());
    }

    #[tokio::test]
    async fn test_bad_idle_writes_nothing_for_the_line() {
        let tmp = TempDir::new().unwrap();
        let decoder = StreamDecoder::new(MetricWriter::new(tmp.path()));

        let mut input = json_line("node1", "stdout", "08:15:01 all 3.00 0.00 1.50 0.25 0.00 0.00 0.00 0.00 0.00 idle?\n");
        input += &json_line("node1", "stdout", "08:15:02 all 3.00 0.00 1.50 0.25 0.00 0.00 0.00 0.00 0.00 90\n");
        let stats = decoder.run(input.as_bytes()).await;

        assert_eq!(stats.parse_errors, 1);
        assert_eq!(read(tmp.path().join("node1/usr")), "08:15:02 3.00\n");
        assert_eq!(read(tmp.path().join("node1/total")), "08:15:02 10\n");
    }

    #[tokio::test]
    async fn test_write_failure_is_isolated_per_host() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("broken"), "").unwrap();
        let decoder = StreamDecoder::new(MetricWriter::new(tmp.path()));

        let mut input = json_line("broken", "stdout", "08:15:01 all 3.00 0.00 1.50 0.25 0.00 0.00 0.00 0.00 0.00 95.25\n");
        input += &json_line("../escape", "stdout", "08:15:01 all 3.00 0.00 1.50 0.25 0.00 0.00 0.00 0.00 0.00 95.25\n");
        input += &json_line("node1", "stdout", "08:15:01 all 3.00 0.00 1.50 0.25 0.00 0.00 0.00 0.00 0.00 95.25\n");
        let stats = decoder.run(input.as_bytes()).await;

        assert_eq!(stats.write_errors, 10);
        assert_eq!(stats.samples_written, 5);
        assert!(tmp.path().join("node1/total").exists());
    }

    #[tokio::test]
    async fn test_failed_metric_keeps_its_siblings() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("node1/usr")).unwrap();
        let decoder = StreamDecoder::new(MetricWriter::new(tmp.path()));

        let input = json_line("node1", "stdout", "08:15:01 all 3.00 0.00 1.50 0.25 0.00 0.00 0.00 0.00 0.00 95.25\n");
        let stats = decoder.run(input.as_bytes()).await;

        assert_eq!(stats.write_errors, 1);
        assert_eq!(stats.samples_written, 4);
        assert_eq!(read(tmp.path().join("node1/sys")), "08:15:01 1.50\n");
        assert_eq!(read(tmp.path().join("node1/iowait")), "08:15:01 0.25\n");
        assert_eq!(read(tmp.path().join("node1/idle")), "08:15:01 95.25\n");
        assert_eq!(read(tmp.path().join("node1/total")), "08:15:01 4.75\n");
    }

    #[tokio::test]
    async fn test_oversized_line_is_skipped() {
        let tmp = TempDir::new().unwrap();
        let decoder = StreamDecoder::new(MetricWriter::new(tmp.path()));

        let mut input = "x".repeat(3 * MAX_LINE_LEN as usize);
        input.push('\n');
        input += &json_line("node1", "stdout", "08:15:01 all 3 0 1 0 0 0 0 0 0 96\n");
        let stats = decoder.run(input.as_bytes()).await;

        assert_eq!(stats.lines, 2);
        assert_eq!(stats.decode_errors, 1);
        assert_eq!(stats.samples_written, 5);
        assert_eq!(read(tmp.path().join("node1/total")), "08:15:01 4\n");
    }

    #[tokio::test]
    async fn test_last_line_without_newline() {
        let tmp = TempDir::new().unwrap();
        let decoder = StreamDecoder::new(MetricWriter::new(tmp.path()));

        let input = json_line("node1", "stdout", "08:15:01 all 3 0 1 0 0 0 0 0 0 96\n");
        let stats = decoder.run(input.trim_end().as_bytes()).await;

        assert_eq!(stats.samples_written, 5);
        assert_eq!(read(tmp.path().join("node1/total")), "08:15:01 4\n");
    }
}
