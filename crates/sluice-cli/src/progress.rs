//! `\r`-redraw progress line for uploads.
//!
//! Slice uploads own 0–95% of the bar; the merge owns the final 5%, since a
//! multi-GB merge is real work the user would otherwise watch stall at 100%.

use std::io::{self, Write};
use std::time::{Duration, Instant};

use crate::format::{format_bytes, format_speed};

const PROGRESS_REDRAW_INTERVAL: Duration = Duration::from_millis(100);

/// Share of the bar given to slice uploads.
const UPLOAD_SHARE: f64 = 95.0;

pub enum UploadProgressEvent {
    Started {
        total_size: u64,
        chunk_count: u64,
    },
    ChunkUploaded {
        index: u64,
        uploaded_bytes: u64,
        instant_bps: f64,
        average_bps: f64,
    },
    MergeStarted,
    Finished {
        total_size: u64,
        average_bps: f64,
    },
}

pub(crate) fn emit_progress(
    progress: &mut Option<&mut dyn FnMut(UploadProgressEvent)>,
    event: UploadProgressEvent,
) {
    if let Some(callback) = progress.as_deref_mut() {
        callback(event);
    }
}

pub struct UploadProgressRenderer {
    quiet: bool,
    total_size: u64,
    chunk_count: u64,
    percent: f64,
    detail: String,
    last_draw: Instant,
    last_line_len: usize,
    rendered_any: bool,
}

impl UploadProgressRenderer {
    pub fn new(quiet: bool) -> Self {
        Self {
            quiet,
            total_size: 0,
            chunk_count: 0,
            percent: 0.0,
            detail: String::new(),
            last_draw: Instant::now(),
            last_line_len: 0,
            rendered_any: false,
        }
    }

    pub fn on_event(&mut self, event: UploadProgressEvent) {
        match event {
            UploadProgressEvent::Started {
                total_size,
                chunk_count,
            } => {
                self.total_size = total_size;
                self.chunk_count = chunk_count;
                self.detail = format!("0 B / {}", format_bytes(total_size));
                self.render(false);
            }
            UploadProgressEvent::ChunkUploaded {
                index,
                uploaded_bytes,
                instant_bps,
                average_bps,
            } => {
                self.percent = if self.total_size > 0 {
                    UPLOAD_SHARE * uploaded_bytes as f64 / self.total_size as f64
                } else {
                    UPLOAD_SHARE
                };
                self.detail = format!(
                    "chunk {}/{}, {} / {}, {} (avg {})",
                    index + 1,
                    self.chunk_count,
                    format_bytes(uploaded_bytes),
                    format_bytes(self.total_size),
                    format_speed(instant_bps),
                    format_speed(average_bps),
                );
                self.render(false);
            }
            UploadProgressEvent::MergeStarted => {
                self.percent = UPLOAD_SHARE;
                self.detail = "merging on server".to_string();
                self.render(true);
            }
            UploadProgressEvent::Finished {
                total_size,
                average_bps,
            } => {
                self.percent = 100.0;
                self.detail = format!(
                    "{} (avg {})",
                    format_bytes(total_size),
                    format_speed(average_bps),
                );
                self.render(true);
            }
        }
    }

    pub fn finish(&mut self) {
        if self.rendered_any {
            eprintln!();
            self.rendered_any = false;
            self.last_line_len = 0;
        }
    }

    fn render(&mut self, force: bool) {
        if self.quiet {
            return;
        }
        if !force && self.rendered_any && self.last_draw.elapsed() < PROGRESS_REDRAW_INTERVAL {
            return;
        }
        self.last_draw = Instant::now();

        let line = format!("[{:5.1}%] {}", self.percent, self.detail);
        let line_len = line.chars().count();
        let pad_len = self.last_line_len.saturating_sub(line_len);

        eprint!("\r{line}{}", " ".repeat(pad_len));
        let _ = io::stderr().flush();

        self.last_line_len = line_len;
        self.rendered_any = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_budget_tops_out_at_95_until_merge() {
        let mut renderer = UploadProgressRenderer::new(true);
        renderer.on_event(UploadProgressEvent::Started {
            total_size: 1000,
            chunk_count: 2,
        });
        renderer.on_event(UploadProgressEvent::ChunkUploaded {
            index: 1,
            uploaded_bytes: 1000,
            instant_bps: 0.0,
            average_bps: 0.0,
        });
        assert!((renderer.percent - 95.0).abs() < f64::EPSILON);

        renderer.on_event(UploadProgressEvent::Finished {
            total_size: 1000,
            average_bps: 0.0,
        });
        assert!((renderer.percent - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn quiet_renderer_never_marks_output() {
        let mut renderer = UploadProgressRenderer::new(true);
        renderer.on_event(UploadProgressEvent::MergeStarted);
        assert!(!renderer.rendered_any);
        renderer.finish();
    }
}
