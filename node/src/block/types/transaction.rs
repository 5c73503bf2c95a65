use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// Bytes exchanged with a counterparty in a single interaction, seen from the local side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Interaction {
    /// Bytes we uploaded to the counterparty.
    pub up: u64,
    /// Bytes we downloaded from the counterparty.
    pub down: u64,
}

impl Interaction {
    pub fn new(up: u64, down: u64) -> Self {
        Self { up, down }
    }

    /// The same interaction as the counterparty sees it.
    pub fn mirrored(&self) -> Self {
        Self {
            up: self.down,
            down: self.up,
        }
    }

    pub fn size(&self) -> u64 {
        self.up.saturating_add(self.down)
    }
}

impl Display for Interaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "up: {}, down: {}", self.up, self.down)
    }
}

/// Transaction recorded in a block.
///
/// `up`/`down` are the bytes this exchange added, `total_up`/`total_down` the cumulative
/// totals of the chain owner up to and including this block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Transaction {
    pub up: u64,
    pub down: u64,
    pub total_up: u64,
    pub total_down: u64,
}

impl Transaction {
    /// Chains `interaction` on top of the totals of `previous`, the owner's latest block transaction.
    pub(crate) fn chained(interaction: Interaction, previous: Option<&Transaction>) -> Self {
        let (total_up, total_down) = previous
            .map(|prev| (prev.total_up, prev.total_down))
            .unwrap_or_default();
        Self {
            up: interaction.up,
            down: interaction.down,
            total_up: total_up.saturating_add(interaction.up),
            total_down: total_down.saturating_add(interaction.down),
        }
    }

    pub fn interaction(&self) -> Interaction {
        Interaction::new(self.up, self.down)
    }

    /// Whether these totals follow from `previous` plus this transaction's own amounts.
    pub(crate) fn follows(&self, previous: Option<&Transaction>) -> bool {
        Transaction::chained(self.interaction(), previous) == *self
    }
}

impl Display for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "up: {}, down: {}, total_up: {}, total_down: {}",
            self.up, self.down, self.total_up, self.total_down
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn genesis_totals_equal_amounts() {
        let tx = Transaction::chained(Interaction::new(10, 5), None);
        assert_eq!((tx.total_up, tx.total_down), (10, 5));
    }

    #[test]
    fn totals_accumulate_over_previous() {
        let first = Transaction::chained(Interaction::new(10, 5), None);
        let second = Transaction::chained(Interaction::new(10, 5), Some(&first));

        assert_eq!((second.total_up, second.total_down), (20, 10));
        assert!(second.follows(Some(&first)));
        assert!(!second.follows(None));
    }
}
