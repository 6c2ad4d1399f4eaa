//! Milestone timing and per-outcome metrics.

use crate::provider::ThinkingBudget;
use serde::Serialize;
use std::time::Instant;

/// Monotonic milestone clock for one provider call. `started` is the moment of construction.
#[derive(Debug, Clone)]
pub struct Milestones {
    started: Instant,
    connected: Option<Instant>,
    first_token: Option<Instant>,
    completed: Option<Instant>,
}

impl Milestones {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
            connected: None,
            first_token: None,
            completed: None,
        }
    }

    /// Offset of the mark, or `None` if it was already set.
    pub fn mark_connected(&mut self) -> Option<f64> {
        let now = mark_once(&mut self.connected)?;
        Some(ms_since(self.started, now))
    }

    /// Offset of the mark, or `None` if it was already set.
    pub fn mark_first_token(&mut self) -> Option<f64> {
        let now = mark_once(&mut self.first_token)?;
        Some(ms_since(self.started, now))
    }

    pub fn is_connected(&self) -> bool {
        self.connected.is_some()
    }

    /// Later calls move the mark forward (a fallback resolves after the stream drained).
    pub fn mark_completed(&mut self) -> f64 {
        let now = Instant::now();
        self.completed = Some(now);
        ms_since(self.started, now)
    }

    pub fn offsets(&self) -> MilestoneOffsets {
        let at = |t: Option<Instant>| t.map(|t| ms_since(self.started, t));
        MilestoneOffsets {
            connected_ms: at(self.connected),
            first_token_ms: at(self.first_token),
            completed_ms: at(self.completed),
        }
    }
}

fn mark_once(slot: &mut Option<Instant>) -> Option<Instant> {
    if slot.is_some() {
        return None;
    }
    let now = Instant::now();
    *slot = Some(now);
    Some(now)
}

fn ms_since(start: Instant, t: Instant) -> f64 {
    t.saturating_duration_since(start).as_secs_f64() * 1000.0
}

/// Milestones relative to `started`, in milliseconds. `None` means the milestone was never reached.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MilestoneOffsets {
    pub connected_ms: Option<f64>,
    pub first_token_ms: Option<f64>,
    pub completed_ms: Option<f64>,
}

/// Provider-reported token accounting. Providers fill these in inconsistently.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Usage {
    pub input_tokens: Option<u64>,
    pub visible_output_tokens: Option<u64>,
    pub billed_output_tokens: Option<u64>,
    pub finish_reason: Option<String>,
}

impl Usage {
    /// Field-wise "last value wins": anything `newer` reports replaces what we had.
    pub fn merge(&mut self, newer: Usage) {
        if newer.input_tokens.is_some() {
            self.input_tokens = newer.input_tokens;
        }
        if newer.visible_output_tokens.is_some() {
            self.visible_output_tokens = newer.visible_output_tokens;
        }
        if newer.billed_output_tokens.is_some() {
            self.billed_output_tokens = newer.billed_output_tokens;
        }
        if newer.finish_reason.is_some() {
            self.finish_reason = newer.finish_reason;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Metrics {
    pub ttft_ms: Option<f64>,
    pub first_visible_token_ms: Option<f64>,
    pub total_latency_ms: Option<f64>,
    pub post_ttft_latency_ms: Option<f64>,
    pub generation_ms: Option<f64>,
    pub tokens_per_second: Option<f64>,
    pub input_tokens: Option<u64>,
    pub visible_output_tokens: Option<u64>,
    pub billed_output_tokens: Option<u64>,
    pub finish_reason: Option<String>,
    pub thinking_budget: ThinkingBudget,
    pub streaming_enabled: bool,
}

impl Metrics {
    pub fn compute(
        offsets: MilestoneOffsets,
        usage: &Usage,
        response_text: &str,
        thinking_budget: ThinkingBudget,
        streaming_enabled: bool,
    ) -> Self {
        let ttft = offsets.connected_ms;
        let first_visible = offsets.first_token_ms;
        let total = offsets.completed_ms;

        let estimate = estimate_visible_tokens(response_text);
        let visible = usage.visible_output_tokens.unwrap_or(estimate);
        let billed = usage.billed_output_tokens.unwrap_or(estimate);

        Self {
            ttft_ms: ttft.map(round_ms),
            first_visible_token_ms: first_visible.map(round_ms),
            total_latency_ms: total.map(round_ms),
            post_ttft_latency_ms: difference(total, ttft),
            generation_ms: difference(total, first_visible),
            tokens_per_second: tokens_per_second(Some(billed), total),
            input_tokens: usage.input_tokens,
            visible_output_tokens: Some(visible),
            billed_output_tokens: Some(billed),
            finish_reason: usage.finish_reason.clone(),
            thinking_budget,
            streaming_enabled,
        }
    }
}

/// Whitespace-separated word count, used when a provider does not report visible tokens.
pub fn estimate_visible_tokens(text: &str) -> u64 {
    text.split_whitespace().count() as u64
}

/// Billed tokens over wall-clock seconds, two decimals. `None` on missing or zero operands.
pub fn tokens_per_second(billed: Option<u64>, total_ms: Option<f64>) -> Option<f64> {
    let billed = billed.filter(|&n| n > 0)?;
    let total_ms = total_ms.filter(|&ms| ms > 0.0 && ms.is_finite())?;
    let tps = billed as f64 / (total_ms / 1000.0);
    tps.is_finite().then(|| (tps * 100.0).round() / 100.0)
}

fn difference(later: Option<f64>, earlier: Option<f64>) -> Option<f64> {
    Some(round_ms(later? - earlier?))
}

// Microsecond resolution is plenty for network timings.
fn round_ms(ms: f64) -> f64 {
    (ms * 1000.0).round() / 1000.0
}
