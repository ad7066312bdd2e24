use std::collections::{BTreeMap, BTreeSet};

use log::info;
use serde::{Deserialize, Serialize};

use crate::{
    address::Address,
    amount::{dec, dec_map, to_base_units, Amount},
    config::SaleConfig,
    ledger::{LedgerError, LedgerMutation, LedgerSnapshot, LedgerState},
};

mod bonus;

pub use bonus::{bonus_amount, first_digit, BonusRule};

pub const SNAPSHOT_VERSION: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SaleError {
    #[error("{caller} is not allowed to {action}")]
    Unauthorized {
        caller: Address,
        action: &'static str,
    },
    #[error("insufficient funds in account {account}: needed {needed}, available {available}")]
    InsufficientFunds {
        account: Address,
        needed: Amount,
        available: Amount,
    },
    #[error("withdrawal reserve holds {available} wei, payout needs {needed}")]
    InsufficientLiquidity { needed: Amount, available: Amount },
    #[error("purchase of {value} wei is below the minimum of {min_amount} wei")]
    BelowMinimum { value: Amount, min_amount: Amount },
    #[error("minting {requested} on top of supply {supply} exceeds token cap {cap}")]
    CapExceeded {
        requested: Amount,
        supply: Amount,
        cap: Amount,
    },
    #[error("{account}: {reason}")]
    InvalidRequestState {
        account: Address,
        reason: &'static str,
    },
    #[error("no vesting contract configured")]
    VestingContractUnset,
    #[error("allocation for {participant} with txn {txn_hash} already recorded")]
    DuplicateAllocation {
        participant: Address,
        txn_hash: String,
    },
    #[error("invalid amount: {0}")]
    InvalidAmount(&'static str),
    #[error("arithmetic overflow")]
    Overflow,
    #[error("ledger state: {0}")]
    Corrupt(String),
}

impl SaleError {
    /// Stable name reported to callers.
    pub fn kind(&self) -> &'static str {
        match self {
            SaleError::Unauthorized { .. } => "Unauthorized",
            SaleError::InsufficientFunds { .. } | SaleError::InsufficientLiquidity { .. } => {
                "InsufficientFunds"
            }
            SaleError::BelowMinimum { .. } => "BelowMinimum",
            SaleError::CapExceeded { .. } => "CapExceeded",
            SaleError::InvalidRequestState { .. } => "InvalidRequestState",
            SaleError::VestingContractUnset => "VestingContractUnset",
            SaleError::DuplicateAllocation { .. } => "DuplicateAllocation",
            SaleError::InvalidAmount(_) => "InvalidAmount",
            SaleError::Overflow => "Overflow",
            SaleError::Corrupt(_) => "Corrupt",
        }
    }
}

impl From<LedgerError> for SaleError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientFunds {
                account,
                needed,
                available,
            } => SaleError::InsufficientFunds {
                account,
                needed,
                available,
            },
            LedgerError::CapExceeded {
                requested,
                supply,
                cap,
            } => SaleError::CapExceeded {
                requested,
                supply,
                cap,
            },
            LedgerError::Overflow => SaleError::Overflow,
            LedgerError::CorruptSnapshot(msg) => SaleError::Corrupt(msg),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SaleParams {
    pub fund_wallet: Address,
    pub control_wallet: Option<Address>,
    #[serde(with = "dec")]
    pub current_price: Amount,
    #[serde(with = "dec")]
    pub min_amount: Amount,
    pub vesting_contract: Option<Address>,
    pub public_share: u64,
    pub dev_share: u64,
    pub bonus_bps: u32,
    pub bonus_rule: BonusRule,
    pub restrict_admin: bool,
}

impl SaleParams {
    /// Same rules [`SaleConfig::validate`] applies to a deployment.
    pub fn check(&self) -> Result<(), SaleError> {
        let invalid = |msg: &str| Err(SaleError::Corrupt(msg.to_string()));
        if self.current_price == 0 {
            return invalid("current_price must be positive");
        }
        if self.public_share == 0 {
            return invalid("public_share must be positive");
        }
        if self.control_wallet == Some(self.fund_wallet) {
            return invalid("control_wallet must differ from fund_wallet");
        }
        Ok(())
    }
}

impl From<&SaleConfig> for SaleParams {
    fn from(config: &SaleConfig) -> Self {
        Self {
            fund_wallet: config.fund_wallet,
            control_wallet: config.control_wallet,
            current_price: config.initial_price,
            min_amount: config.min_amount,
            vesting_contract: None,
            public_share: config.public_share,
            dev_share: config.dev_share,
            bonus_bps: config.bonus_bps,
            bonus_rule: config.bonus_rule.clone(),
            restrict_admin: config.restrict_admin,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AllocationRecord {
    pub participant: Address,
    pub participant_ref: String,
    pub txn_hash: String,
    /// Base units credited before the bonus.
    #[serde(with = "dec")]
    pub amount: Amount,
    #[serde(with = "dec")]
    pub bonus: Amount,
    #[serde(with = "dec")]
    pub dev_allocation: Amount,
    pub vesting_contract: Address,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum WithdrawalState {
    NoRequest,
    Requested {
        #[serde(with = "dec")]
        tokens: Amount,
    },
}

/// Wei side of the sale: proceeds credited to the fund wallet, payouts to
/// withdrawing participants, and the reserve those payouts come from.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct NativeBook {
    #[serde(with = "dec_map")]
    pub balances: BTreeMap<Address, Amount>,
    #[serde(with = "dec")]
    pub liquidity: Amount,
}

impl NativeBook {
    fn balance_of(&self, account: &Address) -> Amount {
        self.balances.get(account).copied().unwrap_or(0)
    }

    fn credited(&self, account: &Address, amount: Amount) -> Result<Amount, SaleError> {
        self.balance_of(account)
            .checked_add(amount)
            .ok_or(SaleError::Overflow)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SaleSnapshot {
    pub version: u8,
    pub params: SaleParams,
    pub ledger: LedgerSnapshot,
    pub whitelist: BTreeSet<Address>,
    #[serde(with = "dec_map")]
    pub withdrawals: BTreeMap<Address, Amount>,
    pub allocations: Vec<AllocationRecord>,
    pub native: NativeBook,
}

/// The sale state machine. Every mutating method either commits completely
/// or returns an error and leaves the engine as it was.
#[derive(Clone, Debug)]
pub struct SaleEngine {
    params: SaleParams,
    ledger: LedgerState,
    whitelist: BTreeSet<Address>,
    withdrawals: BTreeMap<Address, Amount>,
    allocations: Vec<AllocationRecord>,
    native: NativeBook,
}

impl SaleEngine {
    pub fn new(config: &SaleConfig) -> Self {
        Self {
            params: SaleParams::from(config),
            ledger: LedgerState::new(config.token_cap),
            whitelist: BTreeSet::new(),
            withdrawals: BTreeMap::new(),
            allocations: Vec::new(),
            native: NativeBook::default(),
        }
    }

    pub fn snapshot(&self) -> SaleSnapshot {
        SaleSnapshot {
            version: SNAPSHOT_VERSION,
            params: self.params.clone(),
            ledger: self.ledger.snapshot(),
            whitelist: self.whitelist.clone(),
            withdrawals: self.withdrawals.clone(),
            allocations: self.allocations.clone(),
            native: self.native.clone(),
        }
    }

    pub fn restore(snapshot: SaleSnapshot) -> Result<Self, SaleError> {
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(SaleError::Corrupt(format!(
                "unsupported snapshot version {}",
                snapshot.version
            )));
        }
        snapshot.params.check()?;
        let ledger = LedgerState::from_snapshot(snapshot.ledger)?;
        if ledger.cap() == 0 {
            return Err(SaleError::Corrupt("token cap must be positive".into()));
        }
        for (account, tokens) in &snapshot.withdrawals {
            if ledger.account(account).locked < *tokens {
                return Err(SaleError::Corrupt(format!(
                    "withdrawal request of {account} exceeds its locked balance"
                )));
            }
        }
        Ok(Self {
            params: snapshot.params,
            ledger,
            whitelist: snapshot.whitelist,
            withdrawals: snapshot.withdrawals,
            allocations: snapshot.allocations,
            native: snapshot.native,
        })
    }

    pub fn ledger(&self) -> &LedgerState {
        &self.ledger
    }

    pub fn params(&self) -> &SaleParams {
        &self.params
    }

    //==================== reads ====================//

    pub fn fund_wallet(&self) -> Address {
        self.params.fund_wallet
    }

    pub fn control_wallet(&self) -> Option<Address> {
        self.params.control_wallet
    }

    pub fn token_cap(&self) -> Amount {
        self.ledger.cap()
    }

    pub fn current_price(&self) -> Amount {
        self.params.current_price
    }

    pub fn min_amount(&self) -> Amount {
        self.params.min_amount
    }

    pub fn vesting_contract(&self) -> Option<Address> {
        self.params.vesting_contract
    }

    pub fn whitelist(&self, account: &Address) -> bool {
        self.whitelist.contains(account)
    }

    pub fn total_supply(&self) -> Amount {
        self.ledger.total_supply()
    }

    pub fn balance_of(&self, account: &Address) -> Amount {
        self.ledger.balance_of(account)
    }

    pub fn native_balance_of(&self, account: &Address) -> Amount {
        self.native.balance_of(account)
    }

    pub fn liquidity(&self) -> Amount {
        self.native.liquidity
    }

    pub fn withdrawal_state(&self, account: &Address) -> WithdrawalState {
        match self.withdrawals.get(account) {
            Some(tokens) => WithdrawalState::Requested { tokens: *tokens },
            None => WithdrawalState::NoRequest,
        }
    }

    pub fn allocations(&self) -> &[AllocationRecord] {
        &self.allocations
    }

    //==================== authorization ====================//

    fn is_manager(&self, caller: &Address) -> bool {
        *caller == self.params.fund_wallet || self.params.control_wallet == Some(*caller)
    }

    fn require_fund_wallet(&self, caller: &Address, action: &'static str) -> Result<(), SaleError> {
        if *caller != self.params.fund_wallet {
            return Err(SaleError::Unauthorized {
                caller: *caller,
                action,
            });
        }
        Ok(())
    }

    fn require_manager(&self, caller: &Address, action: &'static str) -> Result<(), SaleError> {
        if !self.is_manager(caller) {
            return Err(SaleError::Unauthorized {
                caller: *caller,
                action,
            });
        }
        Ok(())
    }

    //==================== parameters ====================//

    pub fn update_price(&mut self, caller: &Address, price: Amount) -> Result<(), SaleError> {
        if self.params.restrict_admin {
            self.require_manager(caller, "update the price")?;
        }
        if price == 0 {
            return Err(SaleError::InvalidAmount("price must be positive"));
        }
        info!("price updated by {caller}: {} -> {price}", self.params.current_price);
        self.params.current_price = price;
        Ok(())
    }

    pub fn change_min_amount(&mut self, caller: &Address, wei: Amount) -> Result<(), SaleError> {
        if self.params.restrict_admin {
            self.require_fund_wallet(caller, "change the minimum purchase")?;
        }
        info!("minimum purchase changed by {caller}: {} -> {wei} wei", self.params.min_amount);
        self.params.min_amount = wei;
        Ok(())
    }

    /// Points developer allocations at `vesting` and whitelists it.
    pub fn set_vesting_contract(&mut self, caller: &Address, vesting: Address) -> Result<(), SaleError> {
        self.require_fund_wallet(caller, "set the vesting contract")?;
        self.params.vesting_contract = Some(vesting);
        self.whitelist.insert(vesting);
        info!("vesting contract set to {vesting}");
        Ok(())
    }

    pub fn verify_participant(&mut self, caller: &Address, participant: Address) -> Result<(), SaleError> {
        self.require_manager(caller, "verify participants")?;
        if self.whitelist.insert(participant) {
            info!("participant {participant} whitelisted");
        }
        Ok(())
    }

    //==================== token flows ====================//

    /// Credits `amount_tokens` whole tokens (plus the bonus when the rule
    /// holds) to `participant` and mints the matching developer share to the
    /// vesting contract. The participant is not whitelisted.
    pub fn allocate_presale_tokens(
        &mut self,
        caller: &Address,
        participant: Address,
        participant_ref: &str,
        amount_tokens: Amount,
        txn_hash: &str,
    ) -> Result<AllocationRecord, SaleError> {
        self.require_fund_wallet(caller, "allocate presale tokens")?;
        let vesting = self
            .params
            .vesting_contract
            .ok_or(SaleError::VestingContractUnset)?;
        if amount_tokens == 0 {
            return Err(SaleError::InvalidAmount("allocation must be positive"));
        }
        if self
            .allocations
            .iter()
            .any(|r| r.participant == participant && r.txn_hash == txn_hash)
        {
            return Err(SaleError::DuplicateAllocation {
                participant,
                txn_hash: txn_hash.to_string(),
            });
        }

        let amount = to_base_units(amount_tokens).ok_or(SaleError::Overflow)?;
        let bonus = if self.params.bonus_rule.is_eligible(participant_ref, txn_hash) {
            bonus_amount(amount, self.params.bonus_bps).ok_or(SaleError::Overflow)?
        } else {
            0
        };
        let public = amount.checked_add(bonus).ok_or(SaleError::Overflow)?;
        // the bonus is not matched by a developer share
        let dev_allocation = amount
            .checked_mul(self.params.dev_share as Amount)
            .and_then(|v| v.checked_div(self.params.public_share as Amount))
            .ok_or(SaleError::Overflow)?;

        let mut mutations = vec![LedgerMutation::Mint {
            to: participant,
            amount: public,
            reason: format!("presale:{txn_hash}"),
        }];
        if dev_allocation > 0 {
            mutations.push(LedgerMutation::Mint {
                to: vesting,
                amount: dev_allocation,
                reason: format!("dev-allocation:{txn_hash}"),
            });
        }
        self.ledger.apply_mutations(&mutations)?;

        let record = AllocationRecord {
            participant,
            participant_ref: participant_ref.to_string(),
            txn_hash: txn_hash.to_string(),
            amount,
            bonus,
            dev_allocation,
            vesting_contract: vesting,
        };
        self.allocations.push(record.clone());
        info!(
            "presale allocation to {participant}: {amount} + bonus {bonus}, dev {dev_allocation} to {vesting}"
        );
        Ok(record)
    }

    /// Mints `value * price` to the caller and forwards the whole value to
    /// the fund wallet. Returns the minted amount.
    pub fn buy(&mut self, caller: &Address, value: Amount) -> Result<Amount, SaleError> {
        if value < self.params.min_amount {
            return Err(SaleError::BelowMinimum {
                value,
                min_amount: self.params.min_amount,
            });
        }
        let tokens = value
            .checked_mul(self.params.current_price)
            .ok_or(SaleError::Overflow)?;
        if tokens == 0 {
            return Err(SaleError::InvalidAmount("purchase yields no tokens"));
        }
        let fund_wallet = self.params.fund_wallet;
        let proceeds = self.native.credited(&fund_wallet, value)?;

        self.ledger.apply_mutations(&[LedgerMutation::Mint {
            to: *caller,
            amount: tokens,
            reason: "purchase".into(),
        }])?;
        self.native.balances.insert(fund_wallet, proceeds);
        info!("{caller} bought {tokens} for {value} wei");
        Ok(tokens)
    }

    pub fn transfer(&mut self, caller: &Address, to: Address, amount: Amount) -> Result<(), SaleError> {
        self.ledger.apply_mutations(&[LedgerMutation::Transfer {
            from: *caller,
            to,
            amount,
        }])?;
        info!("transfer {amount} from {caller} to {to}");
        Ok(())
    }

    //==================== withdrawal ====================//

    /// Locks `amount` of the caller's tokens pending [`Self::withdraw`].
    pub fn request_withdrawal(&mut self, caller: &Address, amount: Amount) -> Result<(), SaleError> {
        if !self.whitelist.contains(caller) {
            return Err(SaleError::Unauthorized {
                caller: *caller,
                action: "request a withdrawal",
            });
        }
        if self.withdrawals.contains_key(caller) {
            return Err(SaleError::InvalidRequestState {
                account: *caller,
                reason: "a withdrawal request is already pending",
            });
        }
        if amount == 0 {
            return Err(SaleError::InvalidAmount("withdrawal must be positive"));
        }
        self.ledger.apply_mutations(&[LedgerMutation::Lock {
            account: *caller,
            amount,
        }])?;
        self.withdrawals.insert(*caller, amount);
        info!("{caller} requested withdrawal of {amount}");
        Ok(())
    }

    /// Burns the locked tokens of a pending request and pays out
    /// `tokens / price` wei from the reserve. Returns the payout.
    pub fn withdraw(&mut self, caller: &Address) -> Result<Amount, SaleError> {
        let tokens = *self
            .withdrawals
            .get(caller)
            .ok_or(SaleError::InvalidRequestState {
                account: *caller,
                reason: "no withdrawal request",
            })?;
        let payout = tokens
            .checked_div(self.params.current_price)
            .ok_or(SaleError::Overflow)?;
        if payout == 0 {
            return Err(SaleError::InvalidAmount("withdrawal is worth less than 1 wei"));
        }
        if payout > self.native.liquidity {
            return Err(SaleError::InsufficientLiquidity {
                needed: payout,
                available: self.native.liquidity,
            });
        }
        let credited = self.native.credited(caller, payout)?;

        self.ledger.apply_mutations(&[LedgerMutation::BurnLocked {
            account: *caller,
            amount: tokens,
        }])?;
        self.withdrawals.remove(caller);
        self.native.liquidity -= payout;
        self.native.balances.insert(*caller, credited);
        info!("{caller} withdrew {tokens} for {payout} wei");
        Ok(payout)
    }

    /// Adds wei to the reserve that pays withdrawals.
    pub fn add_liquidity(&mut self, caller: &Address, value: Amount) -> Result<(), SaleError> {
        self.require_fund_wallet(caller, "add liquidity")?;
        self.native.liquidity = self
            .native
            .liquidity
            .checked_add(value)
            .ok_or(SaleError::Overflow)?;
        info!("liquidity reserve now {} wei", self.native.liquidity);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amount::TOKEN_SCALE;

    const FUND: Address = Address::new([0xf0; 20]);
    const CONTROL: Address = Address::new([0xc0; 20]);
    const VESTING: Address = Address::new([0x02; 20]);
    const ALICE: Address = Address::new([0xa1; 20]);
    const BOB: Address = Address::new([0xb0; 20]);

    fn engine() -> SaleEngine {
        let mut config = SaleConfig::new(FUND);
        config.control_wallet = Some(CONTROL);
        let mut engine = SaleEngine::new(&config);
        engine.set_vesting_contract(&FUND, VESTING).unwrap();
        engine
    }

    #[test]
    fn dev_allocation_follows_public_amount() {
        let mut engine = engine();
        let record = engine
            .allocate_presale_tokens(&FUND, ALICE, "0xa1a1", 285_000_000, "randomTxnHash")
            .unwrap();
        assert_eq!(record.bonus, 0);
        assert_eq!(record.dev_allocation, 190_000_000 * TOKEN_SCALE);
        assert_eq!(engine.balance_of(&VESTING), 190_000_000 * TOKEN_SCALE);
        assert_eq!(engine.total_supply(), 475_000_000 * TOKEN_SCALE);
        assert!(!engine.whitelist(&ALICE));
    }

    #[test]
    fn duplicate_allocation_is_rejected() {
        let mut engine = engine();
        engine
            .allocate_presale_tokens(&FUND, ALICE, "0xa1", 10, "0xdead")
            .unwrap();
        let supply = engine.total_supply();
        let err = engine
            .allocate_presale_tokens(&FUND, ALICE, "0xa1", 10, "0xdead")
            .unwrap_err();
        assert_eq!(err.kind(), "DuplicateAllocation");
        assert_eq!(engine.total_supply(), supply);
    }

    #[test]
    fn allocation_requires_vesting_contract() {
        let mut engine = SaleEngine::new(&SaleConfig::new(FUND));
        assert_eq!(
            engine
                .allocate_presale_tokens(&FUND, ALICE, "0xa1", 10, "0x-")
                .unwrap_err(),
            SaleError::VestingContractUnset
        );
    }

    #[test]
    fn allocation_over_cap_is_atomic() {
        let mut engine = engine();
        // 570M public + 380M dev fills the cap exactly.
        engine
            .allocate_presale_tokens(&FUND, ALICE, "0xa1", 570_000_000, "0x-")
            .unwrap();
        assert_eq!(engine.total_supply(), engine.token_cap());
        let err = engine
            .allocate_presale_tokens(&FUND, BOB, "0xb0", 1, "0x-")
            .unwrap_err();
        assert_eq!(err.kind(), "CapExceeded");
        assert_eq!(engine.balance_of(&BOB), 0);
        assert!(engine.allocations().len() == 1);
    }

    #[test]
    fn admin_updates_are_restricted() {
        let mut engine = engine();
        assert_eq!(engine.update_price(&ALICE, 3).unwrap_err().kind(), "Unauthorized");
        engine.update_price(&CONTROL, 3).unwrap();
        assert_eq!(engine.current_price(), 3);
        assert!(engine.change_min_amount(&CONTROL, 1).is_err());
        engine.change_min_amount(&FUND, 500_000_000_000_000).unwrap();
        assert_eq!(engine.min_amount(), 500_000_000_000_000);
        assert_eq!(engine.update_price(&FUND, 0).unwrap_err().kind(), "InvalidAmount");
    }

    #[test]
    fn open_admin_accepts_any_caller() {
        let mut config = SaleConfig::new(FUND);
        config.restrict_admin = false;
        let mut engine = SaleEngine::new(&config);
        engine.update_price(&ALICE, 3).unwrap();
        engine.change_min_amount(&BOB, 1).unwrap();
        assert_eq!(engine.current_price(), 3);
        assert_eq!(engine.min_amount(), 1);
    }

    #[test]
    fn buy_mints_at_price_and_forwards_value() {
        let mut engine = engine();
        let one_ether = 1_000_000_000_000_000_000;
        let tokens = engine.buy(&ALICE, one_ether).unwrap();
        assert_eq!(tokens, 10_000 * TOKEN_SCALE);
        assert_eq!(engine.balance_of(&ALICE), tokens);
        assert_eq!(engine.native_balance_of(&FUND), one_ether);

        let err = engine.buy(&BOB, 1).unwrap_err();
        assert_eq!(err.kind(), "BelowMinimum");
        assert_eq!(engine.balance_of(&BOB), 0);
        assert_eq!(engine.native_balance_of(&FUND), one_ether);
    }

    #[test]
    fn withdrawal_round_trip() {
        let mut engine = engine();
        engine
            .allocate_presale_tokens(&FUND, ALICE, "0xa1", 100, "0x-")
            .unwrap();
        engine.add_liquidity(&FUND, TOKEN_SCALE).unwrap();

        let err = engine.request_withdrawal(&ALICE, 10 * TOKEN_SCALE).unwrap_err();
        assert_eq!(err.kind(), "Unauthorized");

        engine.verify_participant(&FUND, ALICE).unwrap();
        engine.request_withdrawal(&ALICE, 10 * TOKEN_SCALE).unwrap();
        assert_eq!(
            engine.withdrawal_state(&ALICE),
            WithdrawalState::Requested {
                tokens: 10 * TOKEN_SCALE
            }
        );
        assert_eq!(
            engine.request_withdrawal(&ALICE, 1).unwrap_err().kind(),
            "InvalidRequestState"
        );
        // locked tokens are still counted but cannot move
        assert_eq!(engine.balance_of(&ALICE), 100 * TOKEN_SCALE);
        assert!(engine.transfer(&ALICE, BOB, 95 * TOKEN_SCALE).is_err());

        let supply = engine.total_supply();
        let payout = engine.withdraw(&ALICE).unwrap();
        assert_eq!(payout, 10 * TOKEN_SCALE / 10_000);
        assert_eq!(engine.native_balance_of(&ALICE), payout);
        assert_eq!(engine.balance_of(&ALICE), 90 * TOKEN_SCALE);
        assert_eq!(engine.total_supply(), supply - 10 * TOKEN_SCALE);
        assert_eq!(engine.withdrawal_state(&ALICE), WithdrawalState::NoRequest);
        engine.ledger().check_invariants().unwrap();
    }

    #[test]
    fn withdraw_without_liquidity_keeps_request() {
        let mut engine = engine();
        engine
            .allocate_presale_tokens(&FUND, ALICE, "0xa1", 100, "0x-")
            .unwrap();
        engine.verify_participant(&FUND, ALICE).unwrap();
        engine.request_withdrawal(&ALICE, 50 * TOKEN_SCALE).unwrap();
        let err = engine.withdraw(&ALICE).unwrap_err();
        assert_eq!(err.kind(), "InsufficientFunds");
        assert!(matches!(
            engine.withdrawal_state(&ALICE),
            WithdrawalState::Requested { .. }
        ));
        assert_eq!(engine.balance_of(&ALICE), 100 * TOKEN_SCALE);
    }

    #[test]
    fn snapshot_restores_engine() {
        let mut engine = engine();
        engine
            .allocate_presale_tokens(&FUND, ALICE, "0x4a", 550, "0x4b")
            .unwrap();
        engine.verify_participant(&FUND, ALICE).unwrap();
        engine.request_withdrawal(&ALICE, TOKEN_SCALE).unwrap();

        let restored = SaleEngine::restore(engine.snapshot()).unwrap();
        assert_eq!(restored.snapshot(), engine.snapshot());
        assert_eq!(restored.balance_of(&ALICE), 605 * TOKEN_SCALE);
    }

    #[test]
    fn bonus_is_not_matched_by_dev_share() {
        let mut engine = engine();
        let record = engine
            .allocate_presale_tokens(&FUND, ALICE, "0x4bd6", 550, "0x4somerandomhash")
            .unwrap();
        let dev = 550 * TOKEN_SCALE * 380 / 570;
        assert_eq!(record.bonus, 55 * TOKEN_SCALE);
        assert_eq!(record.dev_allocation, dev);
        assert_eq!(engine.balance_of(&VESTING), dev);
        assert_eq!(engine.total_supply(), 605 * TOKEN_SCALE + dev);
    }

    #[test]
    fn restore_rejects_unusable_params() {
        let mut engine = engine();
        engine
            .allocate_presale_tokens(&FUND, ALICE, "0xa1", 100, "0x-")
            .unwrap();

        let mut zero_price = engine.snapshot();
        zero_price.params.current_price = 0;
        assert_eq!(SaleEngine::restore(zero_price).unwrap_err().kind(), "Corrupt");

        let mut zero_share = engine.snapshot();
        zero_share.params.public_share = 0;
        assert_eq!(SaleEngine::restore(zero_share).unwrap_err().kind(), "Corrupt");

        let mut same_wallets = engine.snapshot();
        same_wallets.params.control_wallet = Some(FUND);
        assert_eq!(SaleEngine::restore(same_wallets).unwrap_err().kind(), "Corrupt");
    }
}
