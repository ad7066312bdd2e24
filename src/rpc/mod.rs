//! Line-delimited JSON call protocol.
//!
//! Each request line carries the asserted caller and one engine call, each
//! response line is either `{"ok": <reply>}` or `{"error": {kind, message}}`.
//! Method names follow the token contract ABI (`balanceOf`, `withDraw`, ...).

use serde::{Deserialize, Serialize};

use crate::{
    address::Address,
    amount::{dec, Amount},
    sale::{first_digit, AllocationRecord, SaleEngine, WithdrawalState},
    service::{SaleService, ServiceError},
};

pub mod client;
pub mod server;

pub use client::{ClientError, RpcClient};
pub use server::serve;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Request {
    #[serde(default)]
    pub caller: Option<Address>,
    pub call: Call,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "method", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Call {
    FundWallet,
    ControlWallet,
    TokenCap,
    CurrentPrice,
    UpdatePrice {
        #[serde(with = "dec")]
        price: Amount,
    },
    MinAmount,
    ChangeMinAmount {
        #[serde(with = "dec")]
        wei: Amount,
    },
    FirstDigit {
        input: String,
    },
    SetVestingContract {
        address: Address,
    },
    VestingContract,
    Whitelist {
        address: Address,
    },
    VerifyParticipant {
        address: Address,
    },
    TotalSupply,
    BalanceOf {
        address: Address,
    },
    NativeBalanceOf {
        address: Address,
    },
    Liquidity,
    AllocatePresaleTokens {
        participant: Address,
        participant_ref: String,
        #[serde(with = "dec")]
        amount_tokens: Amount,
        txn_hash: String,
    },
    Buy {
        #[serde(with = "dec")]
        value: Amount,
    },
    RequestWithdrawal {
        #[serde(with = "dec")]
        amount: Amount,
    },
    WithdrawalRequest {
        address: Address,
    },
    WithDraw,
    AddLiquidity {
        #[serde(with = "dec")]
        value: Amount,
    },
    Transfer {
        to: Address,
        #[serde(with = "dec")]
        amount: Amount,
    },
    Allocations,
}

impl Call {
    pub fn method(&self) -> &'static str {
        match self {
            Call::FundWallet => "fundWallet",
            Call::ControlWallet => "controlWallet",
            Call::TokenCap => "tokenCap",
            Call::CurrentPrice => "currentPrice",
            Call::UpdatePrice { .. } => "updatePrice",
            Call::MinAmount => "minAmount",
            Call::ChangeMinAmount { .. } => "changeMinAmount",
            Call::FirstDigit { .. } => "firstDigit",
            Call::SetVestingContract { .. } => "setVestingContract",
            Call::VestingContract => "vestingContract",
            Call::Whitelist { .. } => "whitelist",
            Call::VerifyParticipant { .. } => "verifyParticipant",
            Call::TotalSupply => "totalSupply",
            Call::BalanceOf { .. } => "balanceOf",
            Call::NativeBalanceOf { .. } => "nativeBalanceOf",
            Call::Liquidity => "liquidity",
            Call::AllocatePresaleTokens { .. } => "allocatePresaleTokens",
            Call::Buy { .. } => "buy",
            Call::RequestWithdrawal { .. } => "requestWithdrawal",
            Call::WithdrawalRequest { .. } => "withdrawalRequest",
            Call::WithDraw => "withDraw",
            Call::AddLiquidity { .. } => "addLiquidity",
            Call::Transfer { .. } => "transfer",
            Call::Allocations => "allocations",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Reply {
    Unit,
    Address(Address),
    OptionalAddress(Option<Address>),
    Amount(#[serde(with = "dec")] Amount),
    Bool(bool),
    Digit(Option<char>),
    Allocation(AllocationRecord),
    Allocations(Vec<AllocationRecord>),
    Withdrawal(WithdrawalState),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
}

impl ErrorBody {
    fn new(kind: &str, message: impl Into<String>) -> Self {
        Self {
            kind: kind.to_string(),
            message: message.into(),
        }
    }
}

impl From<ServiceError> for ErrorBody {
    fn from(err: ServiceError) -> Self {
        match &err {
            ServiceError::Sale(sale) => Self::new(sale.kind(), err.to_string()),
            ServiceError::Store(_) => Self::new("StoreFailure", err.to_string()),
            ServiceError::ReadOnly(_) => Self::new("BadRequest", err.to_string()),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Response {
    Ok(Reply),
    Error(ErrorBody),
}

/// Parses one request line and runs it.
pub fn handle_line(service: &SaleService, line: &str) -> Response {
    match serde_json::from_str::<Request>(line) {
        Ok(request) => dispatch(service, request),
        Err(err) => Response::Error(ErrorBody::new("BadRequest", err.to_string())),
    }
}

pub fn dispatch(service: &SaleService, request: Request) -> Response {
    let Request { caller, call } = request;
    if let Some(reply) = read_call(service, &call) {
        return Response::Ok(reply);
    }
    let Some(caller) = caller else {
        return Response::Error(ErrorBody::new(
            "Unauthorized",
            format!("{} requires a caller", call.method()),
        ));
    };
    match service.execute(|engine| write_call(engine, &caller, call)) {
        Ok(reply) => Response::Ok(reply),
        Err(err) => Response::Error(err.into()),
    }
}

/// Answers reads from the committed state; `None` for calls that write.
fn read_call(service: &SaleService, call: &Call) -> Option<Reply> {
    service.read(|engine| {
        Some(match call {
            Call::FundWallet => Reply::Address(engine.fund_wallet()),
            Call::ControlWallet => Reply::OptionalAddress(engine.control_wallet()),
            Call::TokenCap => Reply::Amount(engine.token_cap()),
            Call::CurrentPrice => Reply::Amount(engine.current_price()),
            Call::MinAmount => Reply::Amount(engine.min_amount()),
            Call::FirstDigit { input } => Reply::Digit(first_digit(input)),
            Call::VestingContract => Reply::OptionalAddress(engine.vesting_contract()),
            Call::Whitelist { address } => Reply::Bool(engine.whitelist(address)),
            Call::TotalSupply => Reply::Amount(engine.total_supply()),
            Call::BalanceOf { address } => Reply::Amount(engine.balance_of(address)),
            Call::NativeBalanceOf { address } => Reply::Amount(engine.native_balance_of(address)),
            Call::Liquidity => Reply::Amount(engine.liquidity()),
            Call::WithdrawalRequest { address } => {
                Reply::Withdrawal(engine.withdrawal_state(address))
            }
            Call::Allocations => Reply::Allocations(engine.allocations().to_vec()),
            Call::UpdatePrice { .. }
            | Call::ChangeMinAmount { .. }
            | Call::SetVestingContract { .. }
            | Call::VerifyParticipant { .. }
            | Call::AllocatePresaleTokens { .. }
            | Call::Buy { .. }
            | Call::RequestWithdrawal { .. }
            | Call::WithDraw
            | Call::AddLiquidity { .. }
            | Call::Transfer { .. } => return None,
        })
    })
}

fn write_call(engine: &mut SaleEngine, caller: &Address, call: Call) -> Result<Reply, ServiceError> {
    let method = call.method();
    Ok(match call {
        Call::UpdatePrice { price } => {
            engine.update_price(caller, price)?;
            Reply::Unit
        }
        Call::ChangeMinAmount { wei } => {
            engine.change_min_amount(caller, wei)?;
            Reply::Unit
        }
        Call::SetVestingContract { address } => {
            engine.set_vesting_contract(caller, address)?;
            Reply::Unit
        }
        Call::VerifyParticipant { address } => {
            engine.verify_participant(caller, address)?;
            Reply::Unit
        }
        Call::AllocatePresaleTokens {
            participant,
            participant_ref,
            amount_tokens,
            txn_hash,
        } => Reply::Allocation(engine.allocate_presale_tokens(
            caller,
            participant,
            &participant_ref,
            amount_tokens,
            &txn_hash,
        )?),
        Call::Buy { value } => Reply::Amount(engine.buy(caller, value)?),
        Call::RequestWithdrawal { amount } => {
            engine.request_withdrawal(caller, amount)?;
            Reply::Unit
        }
        Call::WithDraw => Reply::Amount(engine.withdraw(caller)?),
        Call::AddLiquidity { value } => {
            engine.add_liquidity(caller, value)?;
            Reply::Unit
        }
        Call::Transfer { to, amount } => {
            engine.transfer(caller, to, amount)?;
            Reply::Unit
        }
        Call::FundWallet
        | Call::ControlWallet
        | Call::TokenCap
        | Call::CurrentPrice
        | Call::MinAmount
        | Call::FirstDigit { .. }
        | Call::VestingContract
        | Call::Whitelist { .. }
        | Call::TotalSupply
        | Call::BalanceOf { .. }
        | Call::NativeBalanceOf { .. }
        | Call::Liquidity
        | Call::WithdrawalRequest { .. }
        | Call::Allocations => return Err(ServiceError::ReadOnly(method)),
    })
}
