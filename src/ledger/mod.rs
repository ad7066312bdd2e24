use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{
    address::Address,
    amount::{dec, Amount},
};

/// Most recent events kept in memory and in snapshots. Older ones are
/// dropped; `height` keeps counting.
pub const EVENT_LOG_LIMIT: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("insufficient funds in account {account}: needed {needed}, available {available}")]
    InsufficientFunds {
        account: Address,
        needed: Amount,
        available: Amount,
    },
    #[error("minting {requested} on top of supply {supply} exceeds token cap {cap}")]
    CapExceeded {
        requested: Amount,
        supply: Amount,
        cap: Amount,
    },
    #[error("arithmetic overflow")]
    Overflow,
    #[error("corrupt snapshot: {0}")]
    CorruptSnapshot(String),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AccountBalance {
    #[serde(with = "dec")]
    pub available: Amount,
    #[serde(with = "dec")]
    pub locked: Amount,
}

impl AccountBalance {
    pub fn total(&self) -> Amount {
        self.available.saturating_add(self.locked)
    }

    fn is_empty(&self) -> bool {
        self.available == 0 && self.locked == 0
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SnapshotMetadata {
    pub height: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub meta: SnapshotMetadata,
    #[serde(with = "dec")]
    pub cap: Amount,
    #[serde(with = "dec")]
    pub total_supply: Amount,
    pub accounts: BTreeMap<Address, AccountBalance>,
    pub events: Vec<LedgerEvent>,
    #[serde(with = "hex_root")]
    pub merkle_root: [u8; 32],
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    Mint {
        to: Address,
        #[serde(with = "dec")]
        amount: Amount,
        reason: String,
    },
    Transfer {
        from: Address,
        to: Address,
        #[serde(with = "dec")]
        amount: Amount,
    },
    Lock {
        account: Address,
        #[serde(with = "dec")]
        amount: Amount,
    },
    Unlock {
        account: Address,
        #[serde(with = "dec")]
        amount: Amount,
    },
    Burn {
        account: Address,
        #[serde(with = "dec")]
        amount: Amount,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LedgerMutation {
    Mint {
        to: Address,
        amount: Amount,
        reason: String,
    },
    Transfer {
        from: Address,
        to: Address,
        amount: Amount,
    },
    /// Moves available tokens to the locked bucket.
    Lock { account: Address, amount: Amount },
    Unlock { account: Address, amount: Amount },
    /// Destroys locked tokens.
    BurnLocked { account: Address, amount: Amount },
}

#[derive(Clone, Debug)]
pub struct LedgerState {
    meta: SnapshotMetadata,
    cap: Amount,
    total_supply: Amount,
    accounts: BTreeMap<Address, AccountBalance>,
    events: Vec<LedgerEvent>,
}

impl LedgerState {
    pub fn new(cap: Amount) -> Self {
        Self {
            meta: SnapshotMetadata::default(),
            cap,
            total_supply: 0,
            accounts: BTreeMap::new(),
            events: Vec::new(),
        }
    }

    pub fn cap(&self) -> Amount {
        self.cap
    }

    pub fn total_supply(&self) -> Amount {
        self.total_supply
    }

    pub fn height(&self) -> u64 {
        self.meta.height
    }

    pub fn events(&self) -> &[LedgerEvent] {
        &self.events
    }

    /// Available plus locked; unknown accounts hold nothing.
    pub fn balance_of(&self, account: &Address) -> Amount {
        self.accounts
            .get(account)
            .map(AccountBalance::total)
            .unwrap_or(0)
    }

    pub fn account(&self, account: &Address) -> AccountBalance {
        self.accounts.get(account).cloned().unwrap_or_default()
    }

    /// Room left under the cap.
    pub fn headroom(&self) -> Amount {
        self.cap.saturating_sub(self.total_supply)
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            meta: self.meta.clone(),
            cap: self.cap,
            total_supply: self.total_supply,
            accounts: self.accounts.clone(),
            events: self.events.clone(),
            merkle_root: compute_merkle_root(self.cap, self.total_supply, &self.accounts),
        }
    }

    pub fn from_snapshot(snapshot: LedgerSnapshot) -> Result<Self, LedgerError> {
        let root = compute_merkle_root(snapshot.cap, snapshot.total_supply, &snapshot.accounts);
        if root != snapshot.merkle_root {
            return Err(LedgerError::CorruptSnapshot(format!(
                "merkle root mismatch: stored {}, computed {}",
                hex::encode(snapshot.merkle_root),
                hex::encode(root)
            )));
        }
        let state = Self {
            meta: snapshot.meta,
            cap: snapshot.cap,
            total_supply: snapshot.total_supply,
            accounts: snapshot.accounts,
            events: snapshot.events,
        };
        state.check_invariants()?;
        Ok(state)
    }

    /// Sum of balances equals supply and supply stays under the cap.
    pub fn check_invariants(&self) -> Result<(), LedgerError> {
        let mut sum: Amount = 0;
        for balance in self.accounts.values() {
            sum = sum
                .checked_add(balance.available)
                .and_then(|s| s.checked_add(balance.locked))
                .ok_or(LedgerError::Overflow)?;
        }
        if sum != self.total_supply {
            return Err(LedgerError::CorruptSnapshot(format!(
                "balances sum to {sum} but total supply is {}",
                self.total_supply
            )));
        }
        if self.total_supply > self.cap {
            return Err(LedgerError::CorruptSnapshot(format!(
                "total supply {} exceeds cap {}",
                self.total_supply, self.cap
            )));
        }
        Ok(())
    }

    /// Applies the whole batch or nothing. Mutations are staged against the
    /// touched accounts only and committed after the last one succeeds.
    pub fn apply_mutations(&mut self, mutations: &[LedgerMutation]) -> Result<(), LedgerError> {
        let mut staged = Staging::new(&self.accounts, self.total_supply);
        let mut events = Vec::with_capacity(mutations.len());

        for mutation in mutations {
            match mutation {
                LedgerMutation::Mint { to, amount, reason } => {
                    let supply = staged.supply;
                    let next = supply.checked_add(*amount).ok_or(LedgerError::Overflow)?;
                    if next > self.cap {
                        return Err(LedgerError::CapExceeded {
                            requested: *amount,
                            supply,
                            cap: self.cap,
                        });
                    }
                    staged.credit(to, *amount)?;
                    staged.supply = next;
                    events.push(LedgerEvent::Mint {
                        to: *to,
                        amount: *amount,
                        reason: reason.clone(),
                    });
                }
                LedgerMutation::Transfer { from, to, amount } => {
                    staged.debit(from, *amount)?;
                    staged.credit(to, *amount)?;
                    events.push(LedgerEvent::Transfer {
                        from: *from,
                        to: *to,
                        amount: *amount,
                    });
                }
                LedgerMutation::Lock { account, amount } => {
                    staged.debit(account, *amount)?;
                    let balance = staged.entry(account);
                    balance.locked = balance
                        .locked
                        .checked_add(*amount)
                        .ok_or(LedgerError::Overflow)?;
                    events.push(LedgerEvent::Lock {
                        account: *account,
                        amount: *amount,
                    });
                }
                LedgerMutation::Unlock { account, amount } => {
                    staged.take_locked(account, *amount)?;
                    staged.credit(account, *amount)?;
                    events.push(LedgerEvent::Unlock {
                        account: *account,
                        amount: *amount,
                    });
                }
                LedgerMutation::BurnLocked { account, amount } => {
                    staged.take_locked(account, *amount)?;
                    staged.supply = staged
                        .supply
                        .checked_sub(*amount)
                        .ok_or(LedgerError::Overflow)?;
                    events.push(LedgerEvent::Burn {
                        account: *account,
                        amount: *amount,
                    });
                }
            }
        }

        let Staging { touched, supply, .. } = staged;
        for (account, balance) in touched {
            if balance.is_empty() {
                self.accounts.remove(&account);
            } else {
                self.accounts.insert(account, balance);
            }
        }
        self.total_supply = supply;
        self.events.extend(events);
        if self.events.len() > EVENT_LOG_LIMIT {
            let excess = self.events.len() - EVENT_LOG_LIMIT;
            self.events.drain(..excess);
        }
        self.meta.height += 1;
        Ok(())
    }
}

/// Copy-on-touch view of the account map used while a batch is in flight.
struct Staging<'a> {
    base: &'a BTreeMap<Address, AccountBalance>,
    touched: BTreeMap<Address, AccountBalance>,
    supply: Amount,
}

impl<'a> Staging<'a> {
    fn new(base: &'a BTreeMap<Address, AccountBalance>, supply: Amount) -> Self {
        Self {
            base,
            touched: BTreeMap::new(),
            supply,
        }
    }

    fn entry(&mut self, account: &Address) -> &mut AccountBalance {
        let base = self.base;
        self.touched
            .entry(*account)
            .or_insert_with(|| base.get(account).cloned().unwrap_or_default())
    }

    fn credit(&mut self, account: &Address, amount: Amount) -> Result<(), LedgerError> {
        let balance = self.entry(account);
        balance.available = balance
            .available
            .checked_add(amount)
            .ok_or(LedgerError::Overflow)?;
        Ok(())
    }

    fn debit(&mut self, account: &Address, amount: Amount) -> Result<(), LedgerError> {
        let balance = self.entry(account);
        if balance.available < amount {
            return Err(LedgerError::InsufficientFunds {
                account: *account,
                needed: amount,
                available: balance.available,
            });
        }
        balance.available -= amount;
        Ok(())
    }

    fn take_locked(&mut self, account: &Address, amount: Amount) -> Result<(), LedgerError> {
        let balance = self.entry(account);
        if balance.locked < amount {
            return Err(LedgerError::InsufficientFunds {
                account: *account,
                needed: amount,
                available: balance.locked,
            });
        }
        balance.locked -= amount;
        Ok(())
    }
}

fn compute_merkle_root(
    cap: Amount,
    total_supply: Amount,
    accounts: &BTreeMap<Address, AccountBalance>,
) -> [u8; 32] {
    let mut leaves: Vec<[u8; 32]> = Vec::with_capacity(accounts.len() + 1);
    let mut hasher = Sha256::new();
    hasher.update(b"supply");
    hasher.update(cap.to_le_bytes());
    hasher.update(total_supply.to_le_bytes());
    leaves.push(hasher.finalize().into());
    for (account, balance) in accounts {
        let mut hasher = Sha256::new();
        hasher.update(b"acct");
        hasher.update(account.as_bytes());
        hasher.update(balance.available.to_le_bytes());
        hasher.update(balance.locked.to_le_bytes());
        leaves.push(hasher.finalize().into());
    }
    build_merkle(leaves)
}

fn build_merkle(mut leaves: Vec<[u8; 32]>) -> [u8; 32] {
    if leaves.is_empty() {
        return Sha256::digest(b"gro-ledger-empty").into();
    }
    while leaves.len() > 1 {
        let mut next = Vec::with_capacity(leaves.len().div_ceil(2));
        for chunk in leaves.chunks(2) {
            let mut hasher = Sha256::new();
            hasher.update(b"node");
            hasher.update(chunk[0]);
            if chunk.len() == 2 {
                hasher.update(chunk[1]);
            } else {
                hasher.update(chunk[0]);
            }
            next.push(hasher.finalize().into());
        }
        leaves = next;
    }
    leaves[0]
}

mod hex_root {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(value))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded = String::deserialize(deserializer)?;
        let bytes = hex::decode(&encoded).map_err(D::Error::custom)?;
        bytes
            .as_slice()
            .try_into()
            .map_err(|_| D::Error::custom("merkle root must be 32 bytes"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amount::TOKEN_SCALE;

    fn addr(byte: u8) -> Address {
        Address::new([byte; 20])
    }

    fn mint(to: Address, amount: Amount) -> LedgerMutation {
        LedgerMutation::Mint {
            to,
            amount,
            reason: "test".into(),
        }
    }

    #[test]
    fn merkle_root_is_deterministic() {
        let mut ledger = LedgerState::new(1_000_000);
        ledger
            .apply_mutations(&[mint(addr(1), 1_000), mint(addr(2), 2_000)])
            .unwrap();
        let root1 = ledger.snapshot().merkle_root;
        let root2 = ledger.snapshot().merkle_root;
        assert_eq!(root1, root2);
    }

    #[test]
    fn applying_mutations_updates_balances_and_events() {
        let mut ledger = LedgerState::new(950_000_000 * TOKEN_SCALE);
        ledger
            .apply_mutations(&[
                mint(addr(1), 200 * TOKEN_SCALE),
                LedgerMutation::Transfer {
                    from: addr(1),
                    to: addr(2),
                    amount: 100 * TOKEN_SCALE,
                },
                LedgerMutation::Lock {
                    account: addr(2),
                    amount: 40 * TOKEN_SCALE,
                },
            ])
            .unwrap();
        assert_eq!(ledger.balance_of(&addr(1)), 100 * TOKEN_SCALE);
        assert_eq!(ledger.balance_of(&addr(2)), 100 * TOKEN_SCALE);
        assert_eq!(ledger.account(&addr(2)).locked, 40 * TOKEN_SCALE);
        assert_eq!(ledger.total_supply(), 200 * TOKEN_SCALE);
        assert_eq!(ledger.events().len(), 3);
        assert_eq!(ledger.height(), 1);
        ledger.check_invariants().unwrap();
    }

    #[test]
    fn failing_batch_leaves_state_untouched() {
        let mut ledger = LedgerState::new(1_000);
        ledger.apply_mutations(&[mint(addr(1), 500)]).unwrap();
        let before = ledger.snapshot();

        let err = ledger
            .apply_mutations(&[mint(addr(2), 300), mint(addr(3), 300)])
            .unwrap_err();
        assert_eq!(
            err,
            LedgerError::CapExceeded {
                requested: 300,
                supply: 800,
                cap: 1_000
            }
        );
        assert_eq!(ledger.snapshot(), before);
        assert_eq!(ledger.balance_of(&addr(2)), 0);
    }

    #[test]
    fn locked_tokens_cannot_be_transferred() {
        let mut ledger = LedgerState::new(1_000);
        ledger
            .apply_mutations(&[
                mint(addr(1), 100),
                LedgerMutation::Lock {
                    account: addr(1),
                    amount: 80,
                },
            ])
            .unwrap();
        let err = ledger
            .apply_mutations(&[LedgerMutation::Transfer {
                from: addr(1),
                to: addr(2),
                amount: 50,
            }])
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InsufficientFunds { available: 20, .. }
        ));
    }

    #[test]
    fn burning_locked_tokens_shrinks_supply() {
        let mut ledger = LedgerState::new(1_000);
        ledger
            .apply_mutations(&[
                mint(addr(1), 100),
                LedgerMutation::Lock {
                    account: addr(1),
                    amount: 100,
                },
                LedgerMutation::BurnLocked {
                    account: addr(1),
                    amount: 100,
                },
            ])
            .unwrap();
        assert_eq!(ledger.total_supply(), 0);
        assert_eq!(ledger.balance_of(&addr(1)), 0);
        assert!(ledger.snapshot().accounts.is_empty());
    }

    #[test]
    fn snapshot_restores_and_detects_tampering() {
        let mut ledger = LedgerState::new(1_000);
        ledger.apply_mutations(&[mint(addr(7), 250)]).unwrap();
        let snapshot = ledger.snapshot();

        let restored = LedgerState::from_snapshot(snapshot.clone()).unwrap();
        assert_eq!(restored.balance_of(&addr(7)), 250);

        let mut tampered = snapshot;
        tampered
            .accounts
            .insert(addr(7), AccountBalance { available: 999, locked: 0 });
        assert!(matches!(
            LedgerState::from_snapshot(tampered),
            Err(LedgerError::CorruptSnapshot(_))
        ));
    }

    #[test]
    fn event_log_keeps_only_recent_events() {
        let mut ledger = LedgerState::new(Amount::MAX);
        let batches = EVENT_LOG_LIMIT as u64 + 5;
        for n in 0..batches {
            ledger
                .apply_mutations(&[LedgerMutation::Mint {
                    to: Address::new([1; 20]),
                    amount: 1,
                    reason: format!("batch {n}"),
                }])
                .unwrap();
        }
        assert_eq!(ledger.events().len(), EVENT_LOG_LIMIT);
        assert_eq!(ledger.height(), batches);
        assert_eq!(ledger.total_supply(), batches as Amount);
        match ledger.events().last() {
            Some(LedgerEvent::Mint { reason, .. }) => {
                assert_eq!(*reason, format!("batch {}", batches - 1))
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
