/// Lightweight diagnostic sink shared by every tuberun component.
///
/// Components never call the `tracing` macros directly; they hold an
/// `Arc<dyn TraceWriter>` so that tests can swap in a collecting writer.
pub trait TraceWriter: Send + Sync {
    /// Log an informational message.
    fn info(&self, message: &str);

    /// Log a verbose / debug message.
    fn verbose(&self, message: &str);

    /// Log a warning message.
    fn warning(&self, message: &str) {
        self.info(&format!("[warning] {message}"));
    }

    /// Log an error message.
    fn error(&self, message: &str) {
        self.info(&format!("[error] {message}"));
    }
}

/// Discards everything.
#[derive(Debug, Clone)]
pub struct NullTraceWriter;

impl TraceWriter for NullTraceWriter {
    fn info(&self, _message: &str) {}
    fn verbose(&self, _message: &str) {}
    fn warning(&self, _message: &str) {}
    fn error(&self, _message: &str) {}
}

/// A trace writer that keeps every message in memory so tests can assert on
/// what a component reported.
#[derive(Debug)]
pub struct CollectingTraceWriter {
    messages: parking_lot::Mutex<Vec<(TraceLevel, String)>>,
}

/// The level of a collected trace message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceLevel {
    Info,
    Verbose,
    Warning,
    Error,
}

impl CollectingTraceWriter {
    pub fn new() -> Self {
        Self {
            messages: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Return all collected messages.
    pub fn messages(&self) -> Vec<(TraceLevel, String)> {
        self.messages.lock().clone()
    }

    /// Messages collected at the given level, in order.
    pub fn at_level(&self, level: TraceLevel) -> Vec<String> {
        self.messages
            .lock()
            .iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, m)| m.clone())
            .collect()
    }

    /// Number of messages at `level` containing `needle`.
    pub fn count_matching(&self, level: TraceLevel, needle: &str) -> usize {
        self.messages
            .lock()
            .iter()
            .filter(|(l, m)| *l == level && m.contains(needle))
            .count()
    }

    /// Clear collected messages.
    pub fn clear(&self) {
        self.messages.lock().clear();
    }

    fn push(&self, level: TraceLevel, message: &str) {
        self.messages.lock().push((level, message.to_string()));
    }
}

impl Default for CollectingTraceWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl TraceWriter for CollectingTraceWriter {
    fn info(&self, message: &str) {
        self.push(TraceLevel::Info, message);
    }

    fn verbose(&self, message: &str) {
        self.push(TraceLevel::Verbose, message);
    }

    fn warning(&self, message: &str) {
        self.push(TraceLevel::Warning, message);
    }

    fn error(&self, message: &str) {
        self.push(TraceLevel::Error, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collecting_writer_keeps_order_and_level() {
        let writer = CollectingTraceWriter::new();
        writer.info("hello");
        writer.warning("warn");
        writer.error("err");
        writer.verbose("verb");
        let msgs = writer.messages();
        assert_eq!(msgs.len(), 4);
        assert_eq!(msgs[0], (TraceLevel::Info, "hello".into()));
        assert_eq!(msgs[1], (TraceLevel::Warning, "warn".into()));
        assert_eq!(msgs[2], (TraceLevel::Error, "err".into()));
        assert_eq!(msgs[3], (TraceLevel::Verbose, "verb".into()));
    }

    #[test]
    fn count_matching_filters_by_level() {
        let writer = CollectingTraceWriter::new();
        writer.warning("Invalid command requested: 'ghost'");
        writer.info("Invalid command requested: 'ghost'");
        writer.warning("something else");
        assert_eq!(writer.count_matching(TraceLevel::Warning, "ghost"), 1);
        assert_eq!(writer.at_level(TraceLevel::Warning).len(), 2);

        writer.clear();
        assert!(writer.messages().is_empty());
    }

    #[test]
    fn default_warning_goes_through_info() {
        struct InfoOnly(parking_lot::Mutex<Vec<String>>);
        impl TraceWriter for InfoOnly {
            fn info(&self, message: &str) {
                self.0.lock().push(message.to_string());
            }
            fn verbose(&self, _message: &str) {}
        }

        let writer = InfoOnly(parking_lot::Mutex::new(Vec::new()));
        writer.warning("careful");
        writer.error("broken");
        let seen = writer.0.lock().clone();
        assert_eq!(seen, vec!["[warning] careful", "[error] broken"]);
    }

    #[test]
    fn null_writer_does_not_panic() {
        let writer = NullTraceWriter;
        writer.info("test");
        writer.verbose("test");
        writer.warning("test");
        writer.error("test");
    }
}
