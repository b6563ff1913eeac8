use crate::error::StoreError;
use crate::schemas::{
    Expense, ExpenseFilter, ExpensePatch, Group, Ledger, Member, MemberId, MemberSet,
};
use crate::store::Store;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
struct Tables {
    members: HashMap<MemberId, Member>,
    groups: Vec<Group>,
    expenses: Vec<Expense>,
}

/// Store kept in process memory. Every update runs under the write lock, so a
/// settled-by change cannot be lost to a concurrent one.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn settled_by_mut<'a>(expenses: &'a mut [Expense], id: &str) -> Option<&'a mut MemberSet> {
    expenses
        .iter_mut()
        .find(|expense| expense.id == id)
        .and_then(|expense| match &mut expense.ledger {
            Ledger::Group { settled_by, .. } => Some(settled_by),
            Ledger::Personal { .. } => None,
        })
}

#[async_trait]
impl Store for MemoryStore {
    async fn upsert_member(&self, member: Member) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        tables.members.insert(member.id.clone(), member);
        Ok(())
    }

    async fn members(&self, ids: &MemberSet) -> Result<Vec<Member>, StoreError> {
        let tables = self.tables.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| tables.members.get(id).cloned())
            .collect())
    }

    async fn insert_group(&self, group: Group) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if tables
            .groups
            .iter()
            .any(|g| g.id == group.id || g.join_code == group.join_code)
        {
            return Err(StoreError::Duplicate {
                entity_type: "Group",
                identifier: group.join_code,
            });
        }
        tables.groups.push(group);
        Ok(())
    }

    async fn group(&self, id: &str) -> Result<Option<Group>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.groups.iter().find(|g| g.id == id).cloned())
    }

    async fn group_by_join_code(&self, join_code: &str) -> Result<Option<Group>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .groups
            .iter()
            .find(|g| g.join_code == join_code)
            .cloned())
    }

    async fn add_group_member(&self, group: &str, member: &str) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        match tables.groups.iter_mut().find(|g| g.id == group) {
            Some(group) => {
                group.members.insert(member.to_string());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn groups_of(&self, member: &str) -> Result<Vec<Group>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .groups
            .iter()
            .filter(|g| g.is_member(member))
            .cloned()
            .collect())
    }

    async fn insert_expense(&self, expense: Expense) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        tables.expenses.push(expense);
        Ok(())
    }

    async fn expense(&self, id: &str) -> Result<Option<Expense>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.expenses.iter().find(|e| e.id == id).cloned())
    }

    async fn group_expenses(&self, group: &str) -> Result<Vec<Expense>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .expenses
            .iter()
            .filter(|e| e.group().is_some_and(|g| g == group))
            .cloned()
            .collect())
    }

    async fn personal_expenses(
        &self,
        owner: &str,
        filter: &ExpenseFilter,
    ) -> Result<Vec<Expense>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .expenses
            .iter()
            .filter(|e| matches!(&e.ledger, Ledger::Personal { owner: o } if o == owner))
            .filter(|e| e.matches(filter))
            .cloned()
            .collect())
    }

    async fn update_expense(&self, id: &str, patch: &ExpensePatch) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        match tables.expenses.iter_mut().find(|e| e.id == id) {
            Some(expense) => {
                patch.apply(expense);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_expense(&self, id: &str) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        let before = tables.expenses.len();
        tables.expenses.retain(|e| e.id != id);
        Ok(tables.expenses.len() < before)
    }

    async fn mark_settled(&self, expense: &str, member: &str) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        Ok(match settled_by_mut(&mut tables.expenses, expense) {
            Some(settled_by) => {
                settled_by.insert(member.to_string());
                true
            }
            None => false,
        })
    }

    async fn unmark_settled(&self, expense: &str, member: &str) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        Ok(match settled_by_mut(&mut tables.expenses, expense) {
            Some(settled_by) => {
                settled_by.remove(member);
                true
            }
            None => false,
        })
    }
}
