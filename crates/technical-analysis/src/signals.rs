use serde::{Deserialize, Serialize};

use crate::indicators::macd;

/// A yes/no trend verdict over a close-price series (oldest first).
pub trait TrendSignal: Send + Sync {
    fn name(&self) -> &'static str;

    fn evaluate(&self, closes: &[f64]) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacdParams {
    pub fast: usize,
    pub slow: usize,
    pub signal: usize,
}

impl Default for MacdParams {
    /// Short periods tuned for young, fast-moving pools.
    fn default() -> Self {
        Self {
            fast: 6,
            slow: 13,
            signal: 5,
        }
    }
}

impl MacdParams {
    /// Below this many closes every MACD pattern reports false.
    pub fn min_len(&self) -> usize {
        self.slow + self.signal + 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MacdPattern {
    /// Histogram positive, or three negative bars climbing toward zero.
    AboutToGoldenCross,
    /// Latest histogram bar positive.
    Golden,
    /// Histogram negative, or three positive bars falling toward zero.
    AboutToDeadCross,
    /// Latest histogram bar negative.
    Dead,
    /// Signal line (DEA) ticked up on the last bar.
    DeaRising,
    /// Histogram grew on the last bar.
    HistogramRising,
}

/// MACD histogram pattern matcher.
#[derive(Debug, Clone, Copy)]
pub struct MacdHistogramSignal {
    pub params: MacdParams,
    pub pattern: MacdPattern,
}

impl MacdHistogramSignal {
    pub fn new(pattern: MacdPattern) -> Self {
        Self {
            params: MacdParams::default(),
            pattern,
        }
    }

    pub fn with_params(pattern: MacdPattern, params: MacdParams) -> Self {
        Self { params, pattern }
    }
}

impl TrendSignal for MacdHistogramSignal {
    fn name(&self) -> &'static str {
        match self.pattern {
            MacdPattern::AboutToGoldenCross => "macd_about_to_golden_cross",
            MacdPattern::Golden => "macd_golden",
            MacdPattern::AboutToDeadCross => "macd_about_to_dead_cross",
            MacdPattern::Dead => "macd_dead",
            MacdPattern::DeaRising => "macd_dea_rising",
            MacdPattern::HistogramRising => "macd_histogram_rising",
        }
    }

    fn evaluate(&self, closes: &[f64]) -> bool {
        if closes.len() < self.params.min_len() {
            return false;
        }

        let result = macd(closes, self.params.fast, self.params.slow, self.params.signal);
        let hist = &result.histogram;
        if hist.len() < 3 {
            return false;
        }

        let a = hist[hist.len() - 3];
        let b = hist[hist.len() - 2];
        let c = hist[hist.len() - 1];

        match self.pattern {
            MacdPattern::AboutToGoldenCross => {
                c > 0.0 || (a < 0.0 && b < 0.0 && c < 0.0 && a < b && b < c)
            }
            MacdPattern::Golden => c > 0.0,
            MacdPattern::AboutToDeadCross => {
                c < 0.0 || (a > 0.0 && b > 0.0 && c > 0.0 && a > b && b > c)
            }
            MacdPattern::Dead => c < 0.0,
            MacdPattern::DeaRising => {
                let dea = &result.signal_line;
                dea[dea.len() - 1] > dea[dea.len() - 2]
            }
            MacdPattern::HistogramRising => c > b,
        }
    }
}

/// The 1m entry trigger: above EMA25 we want a cross coming, below it we
/// want one that already happened.
pub fn buy_macd(closes: &[f64], price: f64, ema25: f64, params: MacdParams) -> bool {
    if price > ema25 {
        MacdHistogramSignal::with_params(MacdPattern::AboutToGoldenCross, params).evaluate(closes)
    } else if price < ema25 {
        MacdHistogramSignal::with_params(MacdPattern::Golden, params).evaluate(closes)
    } else {
        false
    }
}
