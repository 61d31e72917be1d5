//! Terminal rendering of sink events.
//!
//! Lines are prefixed with the project name (`[{name}]` by default), optionally
//! padded, timestamped and stripped of ANSI escapes, and may be mirrored into a
//! per-project log file.

use std::collections::HashMap;
use std::io::Write;
use std::time::Instant;

use strip_ansi_escapes::strip;

use crate::events::Event;

/// Indicates the source stream of a log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// Standard Output.
    Stdout,
    /// Standard Error.
    Stderr,
}

#[derive(Debug, Clone, Default)]
pub struct OutputFormat {
    /// Print lines without any prefix.
    pub raw: bool,
    /// Prefix template, `{name}` and `{time}` are replaced.
    pub prefix: Option<String>,
    /// Pad or truncate the prefix to this many bytes.
    pub prefix_length: Option<usize>,
    /// Prepend elapsed `mm:ss`.
    pub timestamp: bool,
    /// Keep ANSI escapes from child output.
    pub keep_ansi: bool,
    /// Log file template, e.g. `logs/{name}.log`.
    pub log_file: Option<String>,
}

/// Formatting state for printing events.
pub struct OutputState {
    format: OutputFormat,
    start: Instant,
    logs: HashMap<String, Option<std::io::BufWriter<std::fs::File>>>,
}

impl OutputState {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            start: Instant::now(),
            logs: HashMap::new(),
        }
    }

    /// Renders one event as a single terminal line.
    pub fn format(&self, event: &Event) -> String {
        let text = sanitize_text(&event.text(), !self.format.keep_ansi);
        if self.format.raw {
            return text;
        }
        format!("{}{}", self.format_prefix(event.project()), text)
    }

    /// Formats `event`, mirrors it to the project's log file and returns the line.
    pub fn render(&mut self, event: &Event) -> String {
        let line = self.format(event);
        self.write_log(event.project(), &line);
        line
    }

    fn format_prefix(&self, name: &str) -> String {
        let mut prefix = if let Some(template) = self.format.prefix.as_deref() {
            let has_time = template.contains("{time}");
            let rendered = render_template(template, name, &self.elapsed());
            if self.format.timestamp && !has_time {
                format!("{} {}", self.elapsed(), rendered)
            } else {
                rendered
            }
        } else if self.format.timestamp {
            format!("{} [{}]", self.elapsed(), name)
        } else {
            format!("[{}]", name)
        };
        prefix = apply_prefix_length(prefix, self.format.prefix_length);
        if !prefix.is_empty() {
            prefix.push(' ');
        }
        prefix
    }

    fn elapsed(&self) -> String {
        let secs = self.start.elapsed().as_secs();
        format!("{:02}:{:02}", secs / 60, secs % 60)
    }

    fn write_log(&mut self, name: &str, line: &str) {
        let Some(template) = self.format.log_file.as_deref() else {
            return;
        };
        let writer = self.logs.entry(name.to_string()).or_insert_with(|| {
            let path = render_template(template, name, &log_timestamp());
            if let Some(parent) = std::path::Path::new(&path).parent() {
                let _ = std::fs::create_dir_all(parent);
            }
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .ok()
                .map(std::io::BufWriter::new)
        });
        if let Some(writer) = writer {
            let _ = writeln!(writer, "{}", line);
        }
    }

    pub fn flush(&mut self) {
        for writer in self.logs.values_mut().flatten() {
            let _ = writer.flush();
        }
    }
}

fn log_timestamp() -> String {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    now.as_secs().to_string()
}

fn render_template(template: &str, name: &str, time: &str) -> String {
    template.replace("{name}", name).replace("{time}", time)
}

fn apply_prefix_length(prefix: String, length: Option<usize>) -> String {
    let Some(length) = length else { return prefix };
    let mut out = prefix;
    if out.len() > length {
        let mut cut = length;
        while !out.is_char_boundary(cut) {
            cut -= 1;
        }
        out.truncate(cut);
    } else if out.len() < length {
        out.push_str(&" ".repeat(length - out.len()));
    }
    out
}

/// Sanitizes text for display, optionally stripping ANSI escape codes.
///
/// If `strip_ansi` is true, ANSI codes are removed. Invalid UTF-8 sequences are replaced.
pub fn sanitize_text(text: &str, strip_ansi: bool) -> String {
    if !strip_ansi {
        return text.to_string();
    }
    let stripped = strip(text.as_bytes());
    String::from_utf8_lossy(&stripped).to_string()
}
