#[cfg(test)]
mod tests {
    use super::super::indicators::*;
    use super::super::signals::*;
    use analysis_core::Bar;
    use chrono::Utc;

    // Helper function to create sample price data
    fn sample_prices() -> Vec<f64> {
        vec![
            44.34, 44.09, 44.15, 43.61, 44.33, 44.83, 45.10, 45.42, 45.84, 46.08,
            45.89, 46.03, 45.61, 46.28, 46.28, 46.00, 46.03, 46.41, 46.22, 45.64,
        ]
    }

    fn ramp(start: f64, step: f64, len: usize) -> Vec<f64> {
        (0..len).map(|i| start + step * i as f64).collect()
    }

    fn flat_then(tail: &[f64]) -> Vec<f64> {
        let mut data = vec![1.0; 30];
        data.extend_from_slice(tail);
        data
    }

    #[test]
    fn test_sma_basic() {
        let data = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let result = sma(&data, 3);

        assert_eq!(result.len(), 3);
        assert!((result[0] - 2.0).abs() < 0.001); // (1+2+3)/3 = 2
        assert!((result[1] - 3.0).abs() < 0.001); // (2+3+4)/3 = 3
        assert!((result[2] - 4.0).abs() < 0.001); // (3+4+5)/3 = 4
    }

    #[test]
    fn test_sma_insufficient_data() {
        let data = vec![1.0, 2.0];
        let result = sma(&data, 5);

        assert_eq!(result.len(), 0);
    }

    #[test]
    fn test_ma_last_uses_trailing_window() {
        let prices = sample_prices();
        let expected = prices[15..].iter().sum::<f64>() / 5.0;
        assert!((ma_last(&prices, 5).unwrap() - expected).abs() < 1e-9);
    }

    #[test]
    fn test_ma_last_short_series_falls_back_to_mean() {
        let data = vec![2.0, 4.0];
        assert!((ma_last(&data, 60).unwrap() - 3.0).abs() < 1e-9);
        assert!(ma_last(&[], 60).is_none());
        assert!(ma_last(&data, 0).is_none());
    }

    #[test]
    fn test_ema_matches_input_length() {
        let prices = sample_prices();
        let result = ema(&prices, 10);

        assert_eq!(result.len(), prices.len());
        assert_eq!(result[0], prices[0]);
    }

    #[test]
    fn test_ema_recurrence() {
        let data = vec![10.0, 11.0, 12.0];
        let result = ema(&data, 3);
        // multiplier = 2 / (3 + 1) = 0.5
        assert!((result[1] - 10.5).abs() < 1e-9);
        assert!((result[2] - 11.25).abs() < 1e-9);
    }

    #[test]
    fn test_ema_constant_series() {
        let data = vec![5.0; 50];
        let last = ema_last(&data, 25).unwrap();
        assert!((last - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_ema_tracks_trend() {
        let rising = ramp(1.0, 0.01, 60);
        let fast = ema_last(&rising, 25).unwrap();
        let slow = ema_last(&rising, 50).unwrap();
        assert!(fast > slow);
        assert!(fast < *rising.last().unwrap());
    }

    #[test]
    fn test_macd_lengths() {
        let prices = sample_prices();
        let result = macd(&prices, 6, 13, 5);

        assert_eq!(result.macd_line.len(), prices.len());
        assert_eq!(result.signal_line.len(), prices.len());
        assert_eq!(result.histogram.len(), prices.len());
    }

    #[test]
    fn test_macd_invalid_periods() {
        let prices = sample_prices();
        assert!(macd(&prices, 13, 6, 5).histogram.is_empty());
        assert!(macd(&prices, 0, 13, 5).histogram.is_empty());
    }

    #[test]
    fn test_macd_histogram_is_line_minus_signal() {
        let prices = sample_prices();
        let result = macd(&prices, 6, 13, 5);
        for i in 0..prices.len() {
            let diff = result.macd_line[i] - result.signal_line[i];
            assert!((result.histogram[i] - diff).abs() < 1e-12);
        }
    }

    #[test]
    fn test_signals_need_enough_history() {
        let short = ramp(1.0, 0.05, 18);
        for pattern in [MacdPattern::Golden, MacdPattern::Dead, MacdPattern::DeaRising] {
            assert!(!MacdHistogramSignal::new(pattern).evaluate(&short));
        }
    }

    #[test]
    fn test_breakout_from_flat_is_golden() {
        let data = flat_then(&[1.1, 1.2]);

        assert!(MacdHistogramSignal::new(MacdPattern::Golden).evaluate(&data));
        assert!(MacdHistogramSignal::new(MacdPattern::AboutToGoldenCross).evaluate(&data));
        assert!(MacdHistogramSignal::new(MacdPattern::HistogramRising).evaluate(&data));
        assert!(MacdHistogramSignal::new(MacdPattern::DeaRising).evaluate(&data));
        assert!(!MacdHistogramSignal::new(MacdPattern::Dead).evaluate(&data));
    }

    #[test]
    fn test_breakdown_from_flat_is_dead() {
        let data = flat_then(&[0.9, 0.8]);

        assert!(MacdHistogramSignal::new(MacdPattern::Dead).evaluate(&data));
        assert!(MacdHistogramSignal::new(MacdPattern::AboutToDeadCross).evaluate(&data));
        assert!(!MacdHistogramSignal::new(MacdPattern::Golden).evaluate(&data));
        assert!(!MacdHistogramSignal::new(MacdPattern::HistogramRising).evaluate(&data));
        assert!(!MacdHistogramSignal::new(MacdPattern::DeaRising).evaluate(&data));
    }

    #[test]
    fn test_steady_decline_is_about_to_golden_cross() {
        // Histogram stays negative but shrinks toward zero.
        let data = ramp(2.0, -0.01, 40);

        assert!(!MacdHistogramSignal::new(MacdPattern::Golden).evaluate(&data));
        assert!(MacdHistogramSignal::new(MacdPattern::AboutToGoldenCross).evaluate(&data));
    }

    #[test]
    fn test_steady_rise_is_about_to_dead_cross() {
        // Histogram stays positive but shrinks toward zero.
        let data = ramp(1.0, 0.01, 40);

        assert!(MacdHistogramSignal::new(MacdPattern::Golden).evaluate(&data));
        assert!(!MacdHistogramSignal::new(MacdPattern::Dead).evaluate(&data));
        assert!(MacdHistogramSignal::new(MacdPattern::AboutToDeadCross).evaluate(&data));
    }

    #[test]
    fn test_buy_macd_depends_on_side_of_ema() {
        let params = MacdParams::default();
        let declining = ramp(2.0, -0.01, 40);

        // Above the EMA an approaching cross is enough.
        assert!(buy_macd(&declining, 1.0, 0.9, params));
        // Below it the histogram must already be positive.
        assert!(!buy_macd(&declining, 0.9, 1.0, params));

        let breakout = flat_then(&[1.1, 1.2]);
        assert!(buy_macd(&breakout, 1.0, 1.1, params));
    }

    #[test]
    fn test_closes_extracts_close_prices() {
        let bars: Vec<Bar> = sample_prices()
            .into_iter()
            .map(|close| Bar {
                timestamp: Utc::now(),
                open: close,
                high: close,
                low: close,
                close,
                volume: 1000.0,
            })
            .collect();

        assert_eq!(closes(&bars), sample_prices());
    }

    #[test]
    fn test_signal_names_are_distinct() {
        let names: std::collections::HashSet<_> = [
            MacdPattern::AboutToGoldenCross,
            MacdPattern::Golden,
            MacdPattern::AboutToDeadCross,
            MacdPattern::Dead,
            MacdPattern::DeaRising,
            MacdPattern::HistogramRising,
        ]
        .into_iter()
        .map(|p| MacdHistogramSignal::new(p).name())
        .collect();
        assert_eq!(names.len(), 6);
    }
}
