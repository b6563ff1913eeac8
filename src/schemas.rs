use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

pub type MemberId = String;
pub type GroupId = String;
pub type ExpenseId = String;

/// Membership is a set: a member appears at most once and ordering is stable.
pub type MemberSet = BTreeSet<MemberId>;

const JOIN_CODE_LEN: usize = 6;

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Member {
    pub id: MemberId,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    pub join_code: String,
    pub members: MemberSet,
    pub created_by: MemberId,
}

impl Group {
    /// Creates a group whose only member is its creator.
    pub fn new(name: String, creator: MemberId) -> Self {
        Group {
            id: Uuid::new_v4().to_string(),
            name,
            join_code: generate_join_code(),
            members: MemberSet::from([creator.clone()]),
            created_by: creator,
        }
    }

    pub fn is_member(&self, member: &str) -> bool {
        self.members.contains(member)
    }
}

pub fn generate_join_code() -> String {
    let mut code = Uuid::new_v4().simple().to_string();
    code.truncate(JOIN_CODE_LEN);
    code.to_uppercase()
}

/// Join codes are typed by hand, so surrounding whitespace and case are ignored.
pub fn normalize_join_code(code: &str) -> String {
    code.trim().to_uppercase()
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Ledger {
    Personal {
        owner: MemberId,
    },
    Group {
        group: GroupId,
        payer: MemberId,
        #[serde(default)]
        settled_by: MemberSet,
        // Membership at the time the expense was recorded
        #[serde(default, skip_serializing_if = "Option::is_none")]
        split_among: Option<MemberSet>,
    },
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Expense {
    pub id: ExpenseId,
    pub title: String,
    pub amount: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub date: DateTime<Utc>,
    pub ledger: Ledger,
}

impl Expense {
    pub fn personal(title: String, amount: Decimal, owner: MemberId) -> Self {
        Expense {
            id: Uuid::new_v4().to_string(),
            title,
            amount,
            category: None,
            date: Utc::now(),
            ledger: Ledger::Personal { owner },
        }
    }

    /// Records a group expense, snapshotting the group's current membership.
    pub fn for_group(title: String, amount: Decimal, group: &Group, payer: MemberId) -> Self {
        Expense {
            id: Uuid::new_v4().to_string(),
            title,
            amount,
            category: None,
            date: Utc::now(),
            ledger: Ledger::Group {
                group: group.id.clone(),
                payer,
                settled_by: MemberSet::new(),
                split_among: Some(group.members.clone()),
            },
        }
    }

    /// The member who fronted the money: the payer of a group expense or the
    /// owner of a personal one.
    pub fn payer(&self) -> &MemberId {
        match &self.ledger {
            Ledger::Personal { owner } => owner,
            Ledger::Group { payer, .. } => payer,
        }
    }

    pub fn group(&self) -> Option<&GroupId> {
        match &self.ledger {
            Ledger::Personal { .. } => None,
            Ledger::Group { group, .. } => Some(group),
        }
    }

    pub fn as_group_expense(&self) -> Option<GroupExpense<'_>> {
        match &self.ledger {
            Ledger::Personal { .. } => None,
            Ledger::Group {
                payer,
                settled_by,
                split_among,
                ..
            } => Some(GroupExpense {
                id: &self.id,
                amount: self.amount,
                payer,
                settled_by,
                split_among: split_among.as_ref(),
            }),
        }
    }

    pub fn matches(&self, filter: &ExpenseFilter) -> bool {
        if let Some(category) = &filter.category {
            if self.category.as_ref() != Some(category) {
                return false;
            }
        }
        match filter.search.as_deref().map(str::trim) {
            Some(search) if !search.is_empty() => self
                .title
                .to_lowercase()
                .contains(&search.to_lowercase()),
            _ => true,
        }
    }
}

/// Read-only view of a group expense, as consumed by the settlement engine.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GroupExpense<'a> {
    pub id: &'a str,
    pub amount: Decimal,
    pub payer: &'a MemberId,
    pub settled_by: &'a MemberSet,
    pub split_among: Option<&'a MemberSet>,
}

/// Separates a mixed expense list into the personal expenses and the expenses of
/// `group`. Expenses of other groups are dropped.
pub fn split_ledger<'a>(
    expenses: &'a [Expense],
    group: &str,
) -> (Vec<&'a Expense>, Vec<GroupExpense<'a>>) {
    let mut personal = Vec::new();
    let mut shared = Vec::new();
    for expense in expenses {
        match expense.group() {
            None => personal.push(expense),
            Some(id) if id == group => shared.extend(expense.as_group_expense()),
            Some(_) => {}
        }
    }
    (personal, shared)
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct ExpenseFilter {
    pub category: Option<String>,
    pub search: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct ExpensePatch {
    pub title: Option<String>,
    pub amount: Option<Decimal>,
    pub category: Option<String>,
    pub date: Option<DateTime<Utc>>,
}

impl ExpensePatch {
    pub fn apply(&self, expense: &mut Expense) {
        if let Some(title) = &self.title {
            expense.title = title.clone();
        }
        if let Some(amount) = self.amount {
            expense.amount = amount;
        }
        if let Some(category) = &self.category {
            expense.category = Some(category.clone());
        }
        if let Some(date) = self.date {
            expense.date = date;
        }
    }
}
