//! Reaction vote gating an arrest or a release
//!
//! A prompt is posted with one approve and one reject reaction from the bot. After
//! the full window the reactions are counted and the prompt is deleted.

use crate::JAIL_TARGET;
use crate::platform::{MessagingSink, OutgoingMessage, PlatformError};
use poise::serenity_prelude::{ChannelId, MessageId};
use std::time::Duration;
use tracing::{info, warn};

pub const APPROVE: &str = "✅";
pub const REJECT: &str = "❎";

/// Default voting window
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Result of a finished vote
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteOutcome {
    Passed,
    Failed,
}

impl VoteOutcome {
    /// A vote passes with more approvals than the bot's own and more approvals than
    /// rejections. Counts include the bot's reactions.
    #[must_use]
    pub fn tally(approve: u64, reject: u64) -> Self {
        if approve > 1 && approve > reject {
            Self::Passed
        } else {
            Self::Failed
        }
    }

    #[must_use]
    pub fn passed(self) -> bool {
        self == Self::Passed
    }
}

/// Time-boxed approval vote
#[derive(Debug, Clone, Copy)]
pub struct VoteGate {
    window: Duration,
}

impl Default for VoteGate {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl VoteGate {
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self { window }
    }

    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Human-readable window, e.g. "1 minute" or "45 seconds"
    #[must_use]
    pub fn describe_window(&self) -> String {
        let secs = self.window.as_secs();
        if secs >= 60 && secs % 60 == 0 {
            let minutes = secs / 60;
            format!("{minutes} minute{}", if minutes == 1 { "" } else { "s" })
        } else {
            format!("{secs} second{}", if secs == 1 { "" } else { "s" })
        }
    }

    /// Post `prompt` in `channel` and wait for the vote to close
    ///
    /// # Errors
    /// Returns an error if the prompt cannot be posted, reacted to or counted.
    pub async fn run<S>(
        &self,
        sink: &S,
        channel: ChannelId,
        prompt: String,
    ) -> Result<VoteOutcome, PlatformError>
    where
        S: MessagingSink + ?Sized,
    {
        let message = sink.send(channel, OutgoingMessage::text(prompt)).await?;
        let reacted = match sink.react(channel, message, REJECT).await {
            Ok(()) => sink.react(channel, message, APPROVE).await,
            Err(e) => Err(e),
        };
        if let Err(e) = reacted {
            remove_prompt(sink, channel, message).await;
            return Err(e);
        }

        tokio::time::sleep(self.window).await;

        let counts = sink.reaction_counts(channel, message).await;
        remove_prompt(sink, channel, message).await;
        let counts = counts?;

        let approve = counts.get(APPROVE).copied().unwrap_or(0);
        let reject = counts.get(REJECT).copied().unwrap_or(0);
        let outcome = VoteOutcome::tally(approve, reject);
        info!(
            target: JAIL_TARGET,
            channel_id = %channel,
            approve,
            reject,
            outcome = ?outcome,
            "Vote closed"
        );
        Ok(outcome)
    }
}

/// The prompt goes away however the vote ends
async fn remove_prompt<S>(sink: &S, channel: ChannelId, message: MessageId)
where
    S: MessagingSink + ?Sized,
{
    if let Err(e) = sink.delete(channel, message).await {
        warn!(
            target: JAIL_TARGET,
            channel_id = %channel,
            message_id = %message,
            error = %e,
            "Failed to delete vote prompt"
        );
    }
}
