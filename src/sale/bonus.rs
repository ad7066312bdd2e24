use serde::{Deserialize, Serialize};

use crate::amount::Amount;

pub const BPS_DENOMINATOR: Amount = 10_000;

/// Character at byte offset 2, the slot right after a `0x` prefix.
///
/// No numeric parsing happens here: `"0x00d6.."` yields `'0'`, `"0xrandom"`
/// yields `'r'` and `"invalid"` yields `'v'`. Works on bytes: inputs shorter
/// than three bytes, or whose third byte is not ASCII, have no digit.
pub fn first_digit(input: &str) -> Option<char> {
    input
        .as_bytes()
        .get(2)
        .filter(|b| b.is_ascii())
        .map(|b| *b as char)
}

/// Decides whether a presale allocation earns the bonus.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BonusRule {
    /// The transaction hash and the participant reference start with the
    /// same hex digit.
    #[default]
    MatchParticipant,
    /// The transaction hash starts with one of `digits`.
    EligibleDigits { digits: String },
    Disabled,
}

impl BonusRule {
    pub fn is_eligible(&self, participant_ref: &str, txn_hash: &str) -> bool {
        let txn_digit = match first_digit(txn_hash) {
            Some(d) if d.is_ascii_hexdigit() => d.to_ascii_lowercase(),
            _ => return false,
        };
        match self {
            BonusRule::MatchParticipant => first_digit(participant_ref)
                .map(|d| d.to_ascii_lowercase() == txn_digit)
                .unwrap_or(false),
            BonusRule::EligibleDigits { digits } => digits
                .chars()
                .any(|d| d.to_ascii_lowercase() == txn_digit),
            BonusRule::Disabled => false,
        }
    }
}

/// `amount * bps / 10_000`, rounded down.
pub fn bonus_amount(amount: Amount, bps: u32) -> Option<Amount> {
    amount
        .checked_mul(bps as Amount)
        .map(|v| v / BPS_DENOMINATOR)
}
