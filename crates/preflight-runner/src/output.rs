//! Captured process output

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Which pipe a line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stream {
    Stdout,
    Stderr,
}

impl Stream {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stream::Stdout => "stdout",
            Stream::Stderr => "stderr",
        }
    }
}

/// One line of output, without its line terminator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputLine {
    pub stream: Stream,
    pub text: String,
}

/// Receives output lines while the process is still running.
///
/// Called on the thread that invoked [`crate::Runner::run`], in arrival order.
pub trait LineConsumer {
    fn line(&mut self, stream: Stream, text: &str);
}

impl<F> LineConsumer for F
where
    F: FnMut(Stream, &str),
{
    fn line(&mut self, stream: Stream, text: &str) {
        self(stream, text)
    }
}

/// Outcome of a process that ran to completion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Exit code; `None` when the process was ended by a signal
    pub exit_code: Option<i32>,

    /// Interleaved stdout/stderr lines in arrival order
    pub output: Vec<OutputLine>,

    /// Wall-clock time from spawn to exit
    #[serde(with = "duration_ms")]
    pub duration: Duration,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// Lines from one stream only.
    pub fn lines(&self, stream: Stream) -> impl Iterator<Item = &str> {
        self.output
            .iter()
            .filter(move |l| l.stream == stream)
            .map(|l| l.text.as_str())
    }

    /// Text of one stream joined with newlines.
    pub fn text(&self, stream: Stream) -> String {
        self.lines(stream).collect::<Vec<_>>().join("\n")
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
