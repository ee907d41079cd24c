use crate::WaitingEntry;
use chrono::{DateTime, Utc};

/// Telegram message bodies (Markdown). The symbol always leads the first
/// line so history lookups can find it.
pub struct MessageTemplate;

impl MessageTemplate {
    /// Immediate signal from the main multi-timeframe model.
    pub fn primary_signal(symbol: &str, address: &str) -> String {
        format!("🟢{symbol}\n📬 `{address}`")
    }

    /// Immediate signal from the momentum model.
    pub fn momentum_signal(symbol: &str, address: &str) -> String {
        format!("🟣{symbol}\n📬 `{address}`")
    }

    /// A waiting candidate has confirmed on the 1m timeframe.
    pub fn confirmed(symbol: &str, address: &str, waited_minutes: i64) -> String {
        format!("🟢{symbol}\n✅ confirmed after {waited_minutes}m in waiting list\n📬 `{address}`")
    }

    /// A previously confirmed candidate lost its higher-timeframe trend.
    pub fn invalidated(symbol: &str, address: &str) -> String {
        format!("⚠️{symbol}\n❌ signal invalidated, trend broken\n📬 `{address}`")
    }

    pub fn waiting_list(entries: &[WaitingEntry], now: DateTime<Utc>) -> String {
        if entries.is_empty() {
            return format!("Waiting list update ({}): empty", now.format("%H:%M"));
        }

        let mut msg = format!("Waiting list update ({}) 👇\n", now.format("%H:%M"));
        for entry in entries {
            let marker = if entry.confirmed { "✅" } else { "🟢" };
            msg.push_str(&format!(
                "{marker} {:<12}\tadded: {}\n📬 `{}`\n",
                entry.symbol,
                entry.added_at.format("%H:%M"),
                entry.address
            ));
        }
        msg
    }

    pub fn first_alert(original: &str, at: DateTime<Utc>, reason: &str) -> String {
        format!(
            "🔔 first alert\nmessage: {original}\ntime: {}\nreason: {reason}",
            at.format("%Y-%m-%d %H:%M:%S")
        )
    }
}
