//! Scroll-into-view convergence.
//!
//! The target resting place puts the element a little above center:
//! `viewport/2 - elementHeight * 1.5` of scroll offset. The loop nudges the
//! page one wheel unit at a time with a randomized inter-step delay and stops
//! once progress stalls while the remaining distance is under one viewport.
//! The measure and scroll steps are injected so the loop is testable without
//! a page.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::motion::ScrollDirection;

/// Hard cap on scroll steps; pages that never converge (animated layouts,
/// scroll hijacking) fail instead of spinning forever.
pub const MAX_SCROLL_ITERATIONS: usize = 500;

/// One measurement of the viewport and the target element.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ElementPosition {
    #[serde(rename = "viewportHeight")]
    pub viewport_height: f64,
    #[serde(rename = "scrollPos")]
    pub scroll_pos: f64,
    #[serde(rename = "elHeight")]
    pub el_height: f64,
}

/// Drive `scroll` until `measure` reports the element near the desired
/// resting place. The desired offset is fixed from the first measurement.
pub async fn converge<M, MFut, S, SFut>(mut measure: M, mut scroll: S) -> Result<()>
where
    M: FnMut() -> MFut,
    MFut: Future<Output = Result<ElementPosition>>,
    S: FnMut(ScrollDirection) -> SFut,
    SFut: Future<Output = Result<()>>,
{
    let mut position = measure().await?;
    let desired = position.viewport_height / 2.0 - position.el_height * 1.5;
    let mut diff = position.scroll_pos - desired;
    let mut last_diff = f64::INFINITY;

    let converged = |last: f64, diff: f64, viewport: f64| {
        last.abs() <= diff.abs() && diff.abs() < viewport
    };

    let mut iterations = 0;
    while !converged(last_diff, diff, position.viewport_height) {
        if iterations >= MAX_SCROLL_ITERATIONS {
            return Err(Error::Timeout(format!(
                "element did not scroll into view within {MAX_SCROLL_ITERATIONS} steps"
            )));
        }
        iterations += 1;

        // A positive diff means the element sits below the resting place,
        // so the page scrolls down (content moves up).
        let direction = if diff > 0.0 {
            ScrollDirection::Down
        } else {
            ScrollDirection::Up
        };
        scroll(direction).await?;

        let delay = {
            let mut rng = rand::rng();
            Duration::from_millis(rng.random_range(10..40))
        };
        tokio::time::sleep(delay).await;

        position = measure().await?;
        last_diff = diff;
        diff = position.scroll_pos - desired;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use parking_lot::Mutex;

    fn position(scroll_pos: f64) -> ElementPosition {
        ElementPosition {
            viewport_height: 800.0,
            scroll_pos,
            el_height: 100.0,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn converges_by_scrolling_toward_the_element() {
        // Desired offset is 800/2 - 100*1.5 = 250. Starting at 2000, each
        // wheel unit moves 100px, so convergence happens just past the
        // overshoot at 150.
        let scroll_pos = Arc::new(Mutex::new(2000.0_f64));
        let steps = Arc::new(AtomicU32::new(0));

        let measured = Arc::clone(&scroll_pos);
        let stepped = Arc::clone(&scroll_pos);
        let step_count = Arc::clone(&steps);

        converge(
            move || {
                let measured = Arc::clone(&measured);
                async move { Ok(position(*measured.lock())) }
            },
            move |direction| {
                let stepped = Arc::clone(&stepped);
                let step_count = Arc::clone(&step_count);
                async move {
                    step_count.fetch_add(1, Ordering::SeqCst);
                    // Scrolling down moves the element up in the viewport.
                    let delta = match direction {
                        ScrollDirection::Down => -100.0,
                        ScrollDirection::Up => 100.0,
                    };
                    *stepped.lock() += delta;
                    Ok(())
                }
            },
        )
        .await
        .unwrap();

        // 2000 -> 250 needs 18 steps (one overshoot past the target).
        assert_eq!(steps.load(Ordering::SeqCst), 18);
        assert!((*scroll_pos.lock() - 200.0).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn already_in_place_needs_no_scrolling() {
        let steps = Arc::new(AtomicU32::new(0));
        let step_count = Arc::clone(&steps);

        // scroll_pos equals the desired offset exactly, but the first
        // iteration always runs because progress is unknown until a second
        // measurement exists.
        converge(
            || async { Ok(position(250.0)) },
            move |_| {
                let step_count = Arc::clone(&step_count);
                async move {
                    step_count.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            },
        )
        .await
        .unwrap();

        assert_eq!(steps.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_when_scrolling_has_no_effect_far_away() {
        // The page never moves and the element stays several viewports away,
        // so the remaining-distance condition never holds.
        let err = converge(
            || async { Ok(position(5000.0)) },
            |_| async { Ok(()) },
        )
        .await
        .unwrap_err();

        assert!(err.is_timeout());
    }

    #[tokio::test(start_paused = true)]
    async fn measurement_errors_propagate() {
        let calls = Arc::new(AtomicU32::new(0));
        let counted = Arc::clone(&calls);

        let err = converge(
            move || {
                let counted = Arc::clone(&counted);
                async move {
                    if counted.fetch_add(1, Ordering::SeqCst) == 0 {
                        Ok(position(2000.0))
                    } else {
                        Err(Error::Script("element vanished".to_string()))
                    }
                }
            },
            |_| async { Ok(()) },
        )
        .await
        .unwrap_err();

        assert!(matches!(err, Error::Script(_)));
    }
}
