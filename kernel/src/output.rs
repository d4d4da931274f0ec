//! Output sinks: the pluggable destination for sampled trajectory points
//! (spec.md §6.3). The core never writes output directly; the simulator
//! driver in `qss-cli` samples variables and pushes through one of these.

use std::io::Write;

use crate::error::Result;

/// What kind of sample a `(var, t, value)` triple represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleKind {
    /// Continuous-trajectory sample (`x(t)`).
    X,
    /// Quantized-trajectory sample (`q(t)`).
    Q,
    /// A requantization event (trajectory slope/value discontinuity).
    TrajectoryChange,
    /// A zero-crossing handler fired.
    HandlerFired,
}

#[derive(Debug, Clone, Copy)]
pub struct Sample {
    pub t: f64,
    pub value: f64,
}

/// Destination for sampled output (spec.md §6.3).
pub trait OutputSink {
    fn write(&mut self, var_name: &str, kind: SampleKind, samples: &[Sample]) -> Result<()>;

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Batches samples in memory and flushes to an inner sink once `capacity`
/// entries have accumulated, so a slow sink (disk, network) doesn't incur
/// a syscall per sample (spec.md §6.3 ambient: "the teacher always ships
/// a concrete adapter alongside a trait").
pub struct BufferedSampleStream<S: OutputSink> {
    sink: S,
    capacity: usize,
    pending: Vec<(String, SampleKind, Sample)>,
}

impl<S: OutputSink> BufferedSampleStream<S> {
    pub const DEFAULT_CAPACITY: usize = 2048;

    pub fn new(sink: S) -> Self {
        Self::with_capacity(sink, Self::DEFAULT_CAPACITY)
    }

    pub fn with_capacity(sink: S, capacity: usize) -> Self {
        Self { sink, capacity: capacity.max(1), pending: Vec::new() }
    }

    pub fn push(&mut self, var_name: &str, kind: SampleKind, sample: Sample) -> Result<()> {
        self.pending.push((var_name.to_string(), kind, sample));
        if self.pending.len() >= self.capacity {
            self.flush_pending()?;
        }
        Ok(())
    }

    fn flush_pending(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        // Group contiguous runs sharing (name, kind) into single writes,
        // since most callers push in strictly time-ordered per-variable
        // batches.
        let mut start = 0;
        let drained: Vec<_> = self.pending.drain(..).collect();
        while start < drained.len() {
            let (ref name, kind, _) = drained[start];
            let mut end = start + 1;
            while end < drained.len() && drained[end].0 == *name && drained[end].1 == kind {
                end += 1;
            }
            let samples: Vec<Sample> = drained[start..end].iter().map(|(_, _, s)| *s).collect();
            self.sink.write(name, kind, &samples)?;
            start = end;
        }
        Ok(())
    }

    /// Flush any buffered samples and hand back the inner sink.
    pub fn finish(mut self) -> Result<S> {
        self.flush_pending()?;
        self.sink.flush()?;
        Ok(self.sink)
    }
}

impl<S: OutputSink> OutputSink for BufferedSampleStream<S> {
    fn write(&mut self, var_name: &str, kind: SampleKind, samples: &[Sample]) -> Result<()> {
        for s in samples {
            self.push(var_name, kind, *s)?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.flush_pending()?;
        self.sink.flush()
    }
}

/// Reference output sink: one CSV row per sample, `var,kind,t,value`.
pub struct CsvOutputSink<W: Write> {
    writer: W,
    header_written: bool,
}

impl<W: Write> CsvOutputSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, header_written: false }
    }

    fn kind_label(kind: SampleKind) -> &'static str {
        match kind {
            SampleKind::X => "x",
            SampleKind::Q => "q",
            SampleKind::TrajectoryChange => "change",
            SampleKind::HandlerFired => "handler",
        }
    }
}

impl<W: Write> OutputSink for CsvOutputSink<W> {
    fn write(&mut self, var_name: &str, kind: SampleKind, samples: &[Sample]) -> Result<()> {
        if !self.header_written {
            writeln!(self.writer, "var,kind,t,value")?;
            self.header_written = true;
        }
        let label = Self::kind_label(kind);
        for s in samples {
            writeln!(self.writer, "{var_name},{label},{:.17e},{:.17e}", s.t, s.value)?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_sink_writes_header_once() {
        let mut buf = Vec::new();
        {
            let mut sink = CsvOutputSink::new(&mut buf);
            sink.write("x", SampleKind::X, &[Sample { t: 0.0, value: 1.0 }]).unwrap();
            sink.write("x", SampleKind::X, &[Sample { t: 1.0, value: 2.0 }]).unwrap();
        }
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text.lines().filter(|l| l.starts_with("var,kind")).count(), 1);
        assert_eq!(text.lines().count(), 3);
    }

    #[test]
    fn buffered_stream_flushes_at_capacity() {
        let buf = Vec::new();
        let csv = CsvOutputSink::new(buf);
        let mut stream = BufferedSampleStream::with_capacity(csv, 2);
        stream.push("x", SampleKind::X, Sample { t: 0.0, value: 1.0 }).unwrap();
        assert!(stream.pending.len() == 1);
        stream.push("x", SampleKind::X, Sample { t: 1.0, value: 2.0 }).unwrap();
        assert!(stream.pending.is_empty());
        let csv = stream.finish().unwrap();
        let text = String::from_utf8(csv.writer).unwrap();
        assert_eq!(text.lines().count(), 3);
    }
}
