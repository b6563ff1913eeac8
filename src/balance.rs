use std::collections::BTreeMap;

use rust_decimal::{Decimal, RoundingStrategy};

use crate::error::{InvalidInput, SettlementError};
use crate::schemas::{Expense, GroupExpense, Ledger, MemberId, MemberSet};

/// Signed net balance per member: positive is owed to them, negative they owe.
pub type Balances = BTreeMap<MemberId, Decimal>;

/// Fractional digits of the smallest currency unit.
pub const CURRENCY_SCALE: u32 = 2;

/// Decides which members an expense is divided among.
pub trait SplitPolicy: Send + Sync {
    fn participants<'a>(&self, members: &'a MemberSet, expense: &GroupExpense<'a>)
        -> &'a MemberSet;
}

impl<P: SplitPolicy + ?Sized> SplitPolicy for Box<P> {
    fn participants<'a>(
        &self,
        members: &'a MemberSet,
        expense: &GroupExpense<'a>,
    ) -> &'a MemberSet {
        (**self).participants(members, expense)
    }
}

/// Every expense is shared by the group's *current* members, so balances shift
/// when someone joins after an expense was recorded.
#[derive(Clone, Copy, Debug, Default)]
pub struct EqualSplit;

impl SplitPolicy for EqualSplit {
    fn participants<'a>(&self, members: &'a MemberSet, _: &GroupExpense<'a>) -> &'a MemberSet {
        members
    }
}

/// Shares an expense among the members recorded when it was created, falling
/// back to current membership for expenses without a snapshot.
#[derive(Clone, Copy, Debug, Default)]
pub struct RecordedShare;

impl SplitPolicy for RecordedShare {
    fn participants<'a>(
        &self,
        members: &'a MemberSet,
        expense: &GroupExpense<'a>,
    ) -> &'a MemberSet {
        expense.split_among.unwrap_or(members)
    }
}

/// What to do with an expense whose payer is no longer in the member set.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DepartedPayer {
    /// The payer keeps their credit as a virtual participant without a debit.
    #[default]
    Credit,
    Reject,
}

pub struct SettlementEngine<P = EqualSplit> {
    policy: P,
    departed_payer: DepartedPayer,
}

impl SettlementEngine<EqualSplit> {
    pub fn new() -> Self {
        Self::with_policy(EqualSplit)
    }
}

impl Default for SettlementEngine<EqualSplit> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: SplitPolicy> SettlementEngine<P> {
    pub fn with_policy(policy: P) -> Self {
        SettlementEngine {
            policy,
            departed_payer: DepartedPayer::default(),
        }
    }

    pub fn departed_payer(mut self, departed_payer: DepartedPayer) -> Self {
        self.departed_payer = departed_payer;
        self
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }

    /// Computes every member's net balance over the given group expenses.
    ///
    /// Each expense credits its payer with the full amount and debits every
    /// participant one share. A member in the settled-by set has already paid
    /// their share to the payer directly, so their debit and the matching part
    /// of the payer's credit are reversed. The balances always sum to zero,
    /// within the precision of [`Decimal`] division.
    pub fn compute_balances(
        &self,
        members: &MemberSet,
        expenses: &[GroupExpense<'_>],
    ) -> Result<Balances, SettlementError> {
        let mut balances: Balances = members
            .iter()
            .map(|member| (member.clone(), Decimal::ZERO))
            .collect();

        if members.is_empty() && !expenses.is_empty() {
            return Err(InvalidInput::EmptyGroup {
                expenses: expenses.len(),
            }
            .into());
        }

        for expense in expenses {
            self.apply(&mut balances, members, expense)?;
        }

        tracing::debug!(
            members = members.len(),
            expenses = expenses.len(),
            "computed group balances"
        );
        Ok(balances)
    }

    /// Members who owe a share of `expense` and have not settled it yet.
    pub fn outstanding<'a>(
        &self,
        members: &'a MemberSet,
        expense: &GroupExpense<'a>,
    ) -> Vec<&'a MemberId> {
        self.policy
            .participants(members, expense)
            .iter()
            .filter(|member| *member != expense.payer && !expense.settled_by.contains(*member))
            .collect()
    }

    /// Share each participant owes for `expense`.
    pub fn share(
        &self,
        members: &MemberSet,
        expense: &GroupExpense<'_>,
    ) -> Result<Decimal, SettlementError> {
        validate_amount(expense)?;
        let participants = self.policy.participants(members, expense);
        if participants.is_empty() {
            return Err(InvalidInput::EmptySplit {
                expense: expense.id.to_string(),
            }
            .into());
        }
        expense
            .amount
            .checked_div(Decimal::from(participants.len()))
            .ok_or_else(|| overflow(expense))
    }

    fn apply(
        &self,
        balances: &mut Balances,
        members: &MemberSet,
        expense: &GroupExpense<'_>,
    ) -> Result<(), SettlementError> {
        validate_amount(expense)?;
        if !members.contains(expense.payer) && self.departed_payer == DepartedPayer::Reject {
            return Err(InvalidInput::UnknownPayer {
                expense: expense.id.to_string(),
                payer: expense.payer.clone(),
            }
            .into());
        }

        let participants = self.policy.participants(members, expense);
        if let Some(settler) = expense
            .settled_by
            .iter()
            .find(|settler| !participants.contains(*settler))
        {
            return Err(InvalidInput::UnknownSettler {
                expense: expense.id.to_string(),
                settler: settler.clone(),
            }
            .into());
        }

        let share = self.share(members, expense)?;
        adjust(balances, expense.payer, expense.amount, expense)?;
        for member in participants {
            adjust(balances, member, -share, expense)?;
        }
        for settler in expense.settled_by {
            adjust(balances, settler, share, expense)?;
            adjust(balances, expense.payer, -share, expense)?;
        }
        Ok(())
    }
}

/// Balances of `members` over `expenses`, split equally among current members.
pub fn compute_balances(
    members: &MemberSet,
    expenses: &[GroupExpense<'_>],
) -> Result<Balances, SettlementError> {
    SettlementEngine::new().compute_balances(members, expenses)
}

/// Rounds balances half-up to the currency unit for display.
pub fn round_balances(balances: &Balances) -> Balances {
    balances
        .iter()
        .map(|(member, balance)| (member.clone(), round_to_currency(*balance)))
        .collect()
}

pub fn round_to_currency(amount: Decimal) -> Decimal {
    let mut rounded =
        amount.round_dp_with_strategy(CURRENCY_SCALE, RoundingStrategy::MidpointAwayFromZero);
    if rounded.is_zero() {
        return Decimal::new(0, CURRENCY_SCALE);
    }
    rounded.rescale(CURRENCY_SCALE);
    rounded
}

/// Total of `owner`'s personal expenses. Group expenses never count here.
pub fn personal_total(expenses: &[Expense], owner: &str) -> Result<Decimal, SettlementError> {
    expenses
        .iter()
        .filter(|expense| matches!(&expense.ledger, Ledger::Personal { owner: o } if o == owner))
        .try_fold(Decimal::ZERO, |total, expense| {
            total
                .checked_add(expense.amount)
                .ok_or_else(|| SettlementError::Overflow {
                    expense: expense.id.clone(),
                })
        })
}

fn validate_amount(expense: &GroupExpense<'_>) -> Result<(), SettlementError> {
    if expense.amount <= Decimal::ZERO {
        return Err(InvalidInput::NonPositiveAmount {
            expense: expense.id.to_string(),
            amount: expense.amount,
        }
        .into());
    }
    Ok(())
}

fn adjust(
    balances: &mut Balances,
    member: &MemberId,
    delta: Decimal,
    expense: &GroupExpense<'_>,
) -> Result<(), SettlementError> {
    let balance = balances.entry(member.clone()).or_insert(Decimal::ZERO);
    *balance = balance.checked_add(delta).ok_or_else(|| overflow(expense))?;
    Ok(())
}

fn overflow(expense: &GroupExpense<'_>) -> SettlementError {
    SettlementError::Overflow {
        expense: expense.id.to_string(),
    }
}
