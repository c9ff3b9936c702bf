use std::cmp::min;
use std::fmt::Write;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressState, ProgressStyle};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Displays a progress bar while the controller waits for the load generator to ramp up.
///
/// The bar is cleared when this is dropped, which also happens if the wait is cancelled.
pub struct RampProgress {
    bar: ProgressBar,
    ticker: JoinHandle<()>,
}

impl RampProgress {
    pub fn start(planned_wait: Duration) -> Self {
        let bar = ProgressBar::new(planned_wait.as_secs());
        bar.set_style(ramp_style(planned_wait));

        let ticker_bar = bar.clone();
        let ticker = tokio::spawn(async move {
            let start_time = Instant::now();
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            loop {
                interval.tick().await;
                let elapsed = min(start_time.elapsed().as_secs(), planned_wait.as_secs());
                ticker_bar.set_position(elapsed);
            }
        });

        Self { bar, ticker }
    }
}

impl Drop for RampProgress {
    fn drop(&mut self) {
        log::trace!("Ramp progress shutting down");
        self.ticker.abort();
        self.bar.finish_and_clear();
    }
}

fn ramp_style(planned_wait: Duration) -> ProgressStyle {
    let total_secs = planned_wait.as_secs();
    match ProgressStyle::with_template(
        "{spinner:.green} ramping up [{wide_bar:.cyan/blue}] [{elapsed_precise} / {planned_wait}]",
    ) {
        Ok(style) => style
            .with_key(
                "planned_wait",
                move |_state: &ProgressState, w: &mut dyn Write| {
                    let _ = write!(
                        w,
                        "{:02}:{:02}:{:02}",
                        total_secs / 3600,
                        (total_secs % 3600) / 60,
                        total_secs % 60
                    );
                },
            )
            .progress_chars("#>-"),
        Err(e) => {
            log::warn!("Invalid progress template, using the default: {e}");
            ProgressStyle::default_bar()
        }
    }
}
