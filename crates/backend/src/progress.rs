//! Upload progress reporting.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicI16, Ordering};

use tracing::trace;

type Callback = Arc<dyn Fn(u8) + Send + Sync>;

/// Sink for upload percentages.
///
/// Reports are clamped to `0..=100` and only forwarded when they do not go
/// backwards, so observers always see a non-decreasing sequence. Reporting
/// never fails; a reporter with no observer silently drops everything.
#[derive(Clone)]
pub struct ProgressReporter {
	callback: Option<Callback>,
	last: Arc<AtomicI16>,
}

impl ProgressReporter {
	/// A reporter that drops every report.
	pub fn noop() -> Self {
		Self {
			callback: None,
			last: Arc::new(AtomicI16::new(-1)),
		}
	}

	/// A reporter forwarding to `callback`.
	pub fn from_fn(callback: impl Fn(u8) + Send + Sync + 'static) -> Self {
		Self {
			callback: Some(Arc::new(callback)),
			last: Arc::new(AtomicI16::new(-1)),
		}
	}

	/// Reports an absolute percentage.
	pub fn report(&self, percent: u8) {
		let percent = percent.min(100);
		let prev = self.last.fetch_max(i16::from(percent), Ordering::AcqRel);
		if prev > i16::from(percent) {
			trace!(percent, prev, "dropping regressing progress report");
			return;
		}
		if let Some(callback) = &self.callback {
			callback(percent);
		}
	}

	/// Reports `sent` of `total` bytes, rounding down.
	pub fn report_bytes(&self, sent: usize, total: usize) {
		let percent = if total == 0 {
			100
		} else {
			(sent.min(total) as u128 * 100 / total as u128) as u8
		};
		self.report(percent);
	}

	/// Highest percentage reported so far, if any.
	pub fn last(&self) -> Option<u8> {
		u8::try_from(self.last.load(Ordering::Acquire)).ok()
	}
}

impl Default for ProgressReporter {
	fn default() -> Self {
		Self::noop()
	}
}

impl fmt::Debug for ProgressReporter {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ProgressReporter")
			.field("observed", &self.callback.is_some())
			.field("last", &self.last())
			.finish()
	}
}
