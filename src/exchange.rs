use crate::balance::{round_to_currency, Balances, SettlementEngine, SplitPolicy};
use crate::error::SettlementError;
use crate::schemas::{GroupExpense, MemberId, MemberSet};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::BTreeMap;
use std::mem::swap;

/// Balances closer to zero than half a cent are considered settled.
pub const SETTLEMENT_TOLERANCE: Decimal = Decimal::from_parts(5, 0, 0, false, 3);

#[derive(Clone, Debug)]
struct PersonalBalance {
    id: MemberId,
    balance: Decimal,
}

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug)]
struct MemberPair {
    first: MemberId,
    second: MemberId,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Exchange {
    pub payer: MemberId,
    pub receiver: MemberId,
    pub amount: Decimal,
}

// The exchanges that will be made if every unsettled share is paid back to
// its payer directly
fn get_naive_exchanges<P: SplitPolicy>(
    engine: &SettlementEngine<P>,
    members: &MemberSet,
    expenses: &[GroupExpense<'_>],
) -> Result<Vec<Exchange>, SettlementError> {
    let mut balances_between_people: BTreeMap<MemberPair, Decimal> = BTreeMap::new();

    for expense in expenses {
        let share = engine.share(members, expense)?;
        for debtor in engine.outstanding(members, expense) {
            let mut pair = MemberPair {
                first: expense.payer.clone(),
                second: debtor.clone(),
            };
            let mut amount = share;

            // Pairs are stored in alphabetical order so that shares between the
            // same two members net out regardless of who paid
            if pair.first > pair.second {
                swap(&mut pair.first, &mut pair.second);
                amount = -amount;
            }

            let balance = balances_between_people.entry(pair).or_insert(Decimal::ZERO);
            *balance = balance
                .checked_add(amount)
                .ok_or_else(|| SettlementError::Overflow {
                    expense: expense.id.to_string(),
                })?;
        }
    }

    // A positive pair balance means `first` is owed money by `second`
    let exchanges = balances_between_people
        .into_iter()
        .filter(|(_, balance)| balance.abs() >= SETTLEMENT_TOLERANCE)
        .map(|(pair, balance)| {
            let mut payer = pair.second;
            let mut receiver = pair.first;
            if balance < Decimal::ZERO {
                swap(&mut payer, &mut receiver);
            }
            Exchange {
                payer,
                receiver,
                amount: round_to_currency(balance.abs()),
            }
        })
        .collect();

    Ok(exchanges)
}

fn largest_first(people: &mut [PersonalBalance]) {
    people.sort_by(|a, b| b.balance.cmp(&a.balance).then_with(|| a.id.cmp(&b.id)));
}

/// Greedy settlement: the largest debtor pays the largest creditor until every
/// balance is within [`SETTLEMENT_TOLERANCE`] of zero.
pub fn suggest_transfers(balances: &Balances) -> Vec<Exchange> {
    // Divide people into payers and receivers
    let mut payers = Vec::new();
    let mut receivers = Vec::new();

    for (id, balance) in balances {
        if balance.abs() < SETTLEMENT_TOLERANCE {
            continue;
        }
        let person = PersonalBalance {
            id: id.clone(),
            balance: balance.abs(),
        };
        if balance.is_sign_negative() {
            payers.push(person);
        } else {
            receivers.push(person);
        }
    }

    let mut exchanges = Vec::new();

    while !payers.is_empty() && !receivers.is_empty() {
        largest_first(&mut payers);
        largest_first(&mut receivers);
        let payer = &mut payers[0];
        let receiver = &mut receivers[0];

        let amount = payer.balance.min(receiver.balance);
        payer.balance -= amount;
        receiver.balance -= amount;

        let amount = round_to_currency(amount);
        if !amount.is_zero() {
            exchanges.push(Exchange {
                payer: payer.id.clone(),
                receiver: receiver.id.clone(),
                amount,
            });
        }

        payers.retain(|p| p.balance >= SETTLEMENT_TOLERANCE);
        receivers.retain(|r| r.balance >= SETTLEMENT_TOLERANCE);
    }

    exchanges
}

/// Transfers that settle the group: the greedy suggestion, unless paying each
/// share back directly needs no more transfers.
pub fn get_exchanges_from_group<P: SplitPolicy>(
    engine: &SettlementEngine<P>,
    members: &MemberSet,
    expenses: &[GroupExpense<'_>],
) -> Result<Vec<Exchange>, SettlementError> {
    let people_balances = engine.compute_balances(members, expenses)?;

    let naive_exchanges = get_naive_exchanges(engine, members, expenses)?;
    let simplified_exchanges = suggest_transfers(&people_balances);

    // We ensure the simplification didn't accidentally end up being
    // more complicated than the naive exchanges
    if simplified_exchanges.len() < naive_exchanges.len() {
        Ok(simplified_exchanges)
    } else {
        Ok(naive_exchanges)
    }
}
