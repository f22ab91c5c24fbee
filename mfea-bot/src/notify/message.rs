use serde::{Deserialize, Serialize};

use crate::strategy::Evaluation;
use crate::types::SubscriberId;

/// Interactive button rendered under the message; the chat integration owns
/// what a click does.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Button {
    pub label: String,
    pub custom_id: String,
}

impl Button {
    pub fn subscription_controls() -> Vec<Button> {
        vec![
            Button {
                label: "Subscribe".into(),
                custom_id: "mfea_subscribe".into(),
            },
            Button {
                label: "Unsubscribe".into(),
                custom_id: "mfea_unsubscribe".into(),
            },
        ]
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StatusMessage {
    pub status: String,
    pub mentions: Vec<SubscriberId>,
    /// Set by [`StatusMessage::summarized`] once the mentions have been delivered.
    pub notified: Option<usize>,
    pub buttons: Vec<Button>,
}

impl StatusMessage {
    pub fn compose(
        title: &str,
        previous: Option<&str>,
        evaluation: &Evaluation,
        changed: bool,
    ) -> Self {
        let snap = &evaluation.snapshot;
        let current = &evaluation.banded.allocation_description;
        let mut lines = vec![format!("**{title}**")];
        if changed {
            lines.push(format!(
                "Allocation changed: {} -> {current}",
                previous.unwrap_or("unknown")
            ));
        } else {
            lines.push(format!("Allocation unchanged: {current}"));
        }
        lines.push(format!(
            "Price {:.2} is {} its long average {:.2}",
            snap.reference_price,
            if snap.reference_price > snap.long_average {
                "over"
            } else {
                "under"
            },
            snap.long_average
        ));
        lines.push(format!("Volatility {:.2}%", snap.annualized_volatility_pct));
        lines.push(format!(
            "Short rate {:.3}% ({:+.3}{})",
            snap.short_rate,
            snap.short_rate_delta,
            if evaluation.banded.inputs.rate_falling {
                ", falling"
            } else {
                ""
            }
        ));
        if evaluation.modes_disagree() {
            lines.push(format!(
                "Strict rule says {}; holding until the band clears",
                evaluation.strict.allocation_description
            ));
        }

        Self {
            status: lines.join("\n"),
            mentions: Vec::new(),
            notified: None,
            buttons: Button::subscription_controls(),
        }
    }

    pub fn with_mentions(mut self, mentions: Vec<SubscriberId>) -> Self {
        self.mentions = mentions;
        self
    }

    /// Same status with raw mentions replaced by a count.
    pub fn summarized(&self) -> Self {
        Self {
            status: self.status.clone(),
            mentions: Vec::new(),
            notified: Some(self.mentions.len()),
            buttons: self.buttons.clone(),
        }
    }

    pub fn content(&self) -> String {
        let mut out = self.status.clone();
        if !self.mentions.is_empty() {
            let line: Vec<String> = self.mentions.iter().map(|id| format!("<@{}>", id.0)).collect();
            out.push('\n');
            out.push_str(&line.join(" "));
        } else if let Some(n) = self.notified {
            let noun = if n == 1 { "subscriber" } else { "subscribers" };
            out.push_str(&format!("\n{n} {noun} notified"));
        }
        out
    }
}
