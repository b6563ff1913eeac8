//! Persistence for members, groups and expenses.
//!
//! The settlement engine never talks to a store; handlers load a snapshot
//! through [`Store`] and hand it to the engine.

mod memory;
mod mongo;

pub use memory::MemoryStore;
pub use mongo::MongoStore;

use crate::error::StoreError;
use crate::schemas::{Expense, ExpenseFilter, ExpensePatch, Group, Member, MemberSet};
use async_trait::async_trait;

#[async_trait]
pub trait Store: Send + Sync {
    async fn upsert_member(&self, member: Member) -> Result<(), StoreError>;

    async fn members(&self, ids: &MemberSet) -> Result<Vec<Member>, StoreError>;

    async fn insert_group(&self, group: Group) -> Result<(), StoreError>;

    async fn group(&self, id: &str) -> Result<Option<Group>, StoreError>;

    async fn group_by_join_code(&self, join_code: &str) -> Result<Option<Group>, StoreError>;

    /// Adds `member` to the group's member set. Returns `false` if the group
    /// does not exist.
    async fn add_group_member(&self, group: &str, member: &str) -> Result<bool, StoreError>;

    async fn groups_of(&self, member: &str) -> Result<Vec<Group>, StoreError>;

    async fn insert_expense(&self, expense: Expense) -> Result<(), StoreError>;

    async fn expense(&self, id: &str) -> Result<Option<Expense>, StoreError>;

    async fn group_expenses(&self, group: &str) -> Result<Vec<Expense>, StoreError>;

    async fn personal_expenses(
        &self,
        owner: &str,
        filter: &ExpenseFilter,
    ) -> Result<Vec<Expense>, StoreError>;

    async fn update_expense(&self, id: &str, patch: &ExpensePatch) -> Result<bool, StoreError>;

    async fn delete_expense(&self, id: &str) -> Result<bool, StoreError>;

    /// Adds `member` to a group expense's settled-by set in a single atomic
    /// update. Returns `false` if there is no such group expense.
    async fn mark_settled(&self, expense: &str, member: &str) -> Result<bool, StoreError>;

    /// Removes `member` from a group expense's settled-by set atomically.
    async fn unmark_settled(&self, expense: &str, member: &str) -> Result<bool, StoreError>;
}
