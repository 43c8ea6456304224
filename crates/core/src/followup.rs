//! Follow-up ("nudge") policy for silent students.
//!
//! A nudge is armed each time the tutor finishes a response and fires after
//! the silence window, unless the student started talking, the per-session
//! budget is spent, or the previous nudge was too recent.

use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FollowUpPolicy {
    pub budget: u32,
    pub cooldown: Duration,
    pub silence_window: Duration,
}

impl Default for FollowUpPolicy {
    fn default() -> Self {
        Self {
            budget: 6,
            cooldown: Duration::from_secs(15),
            silence_window: Duration::from_secs(12),
        }
    }
}

/// Why a due nudge was not sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Suppression {
    BudgetExhausted,
    Cooldown,
    StudentSpeaking,
}

#[derive(Debug, Clone, Default)]
pub struct FollowUpCounter {
    count: u32,
    last_fire: Option<Instant>,
}

impl FollowUpCounter {
    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn last_fire(&self) -> Option<Instant> {
        self.last_fire
    }

    pub fn exhausted(&self, policy: &FollowUpPolicy) -> bool {
        self.count >= policy.budget
    }

    /// Applies the fire-time gates and records the nudge when they pass.
    pub fn try_fire(
        &mut self,
        policy: &FollowUpPolicy,
        now: Instant,
        student_speaking: bool,
    ) -> Result<u32, Suppression> {
        if self.exhausted(policy) {
            return Err(Suppression::BudgetExhausted);
        }
        if let Some(last) = self.last_fire {
            if now.saturating_duration_since(last) < policy.cooldown {
                return Err(Suppression::Cooldown);
            }
        }
        if student_speaking {
            return Err(Suppression::StudentSpeaking);
        }
        self.count += 1;
        self.last_fire = Some(now);
        Ok(self.count)
    }
}

const NUDGES: [&str; 3] = [
    "The student has been quiet for a while. Gently ask ONE simple question about today's topic to get them talking again.",
    "The student is silent. Encourage them warmly and give a short example sentence they can repeat.",
    "The student has not answered. Rephrase your last question in easier words and wait for a reply.",
];

/// The instruction injected for the `n`-th nudge of a session (1-based).
pub fn nudge_text(n: u32, topic: &str) -> String {
    let idx = (n.saturating_sub(1) as usize) % NUDGES.len();
    format!("{} (Topic: {})", NUDGES[idx], topic)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_is_enforced() {
        let policy = FollowUpPolicy {
            budget: 2,
            cooldown: Duration::ZERO,
            silence_window: Duration::from_secs(1),
        };
        let mut counter = FollowUpCounter::default();
        let now = Instant::now();
        assert_eq!(counter.try_fire(&policy, now, false), Ok(1));
        assert_eq!(counter.try_fire(&policy, now, false), Ok(2));
        assert_eq!(
            counter.try_fire(&policy, now, false),
            Err(Suppression::BudgetExhausted)
        );
        assert_eq!(counter.count(), 2);
    }

    #[test]
    fn test_cooldown_and_speaking_gates() {
        let policy = FollowUpPolicy::default();
        let mut counter = FollowUpCounter::default();
        let t0 = Instant::now();
        assert_eq!(counter.try_fire(&policy, t0, false), Ok(1));
        assert_eq!(
            counter.try_fire(&policy, t0 + Duration::from_secs(14), false),
            Err(Suppression::Cooldown)
        );
        assert_eq!(
            counter.try_fire(&policy, t0 + Duration::from_secs(20), true),
            Err(Suppression::StudentSpeaking)
        );
        assert_eq!(
            counter.try_fire(&policy, t0 + Duration::from_secs(20), false),
            Ok(2)
        );
    }

    #[test]
    fn test_nudge_text_rotates() {
        assert!(nudge_text(1, "My family").contains("ONE simple question"));
        assert!(nudge_text(4, "My family").contains("ONE simple question"));
        assert!(nudge_text(2, "My family").ends_with("(Topic: My family)"));
    }
}
