use crate::error::StoreError;
use crate::schemas::{Expense, ExpenseFilter, ExpensePatch, Group, Member, MemberSet};
use crate::store::Store;
use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{doc, Document};
use mongodb::error::{ErrorKind, WriteFailure};
use mongodb::options::{IndexOptions, ReplaceOptions};
use mongodb::{Client, Collection, IndexModel};

// Server error code for a unique index violation
const DUPLICATE_KEY: i32 = 11000;

pub struct MongoStore {
    members: Collection<Member>,
    groups: Collection<Group>,
    expenses: Collection<Expense>,
}

impl MongoStore {
    pub async fn connect(uri: &str, database: &str) -> Result<Self, StoreError> {
        let client = Client::with_uri_str(uri).await?;
        let database = client.database(database);
        let groups: Collection<Group> = database.collection("Groups");
        groups.create_index(join_code_index(), None).await?;
        tracing::info!(database = database.name(), "connected to MongoDB");
        Ok(MongoStore {
            members: database.collection("Members"),
            groups,
            expenses: database.collection("Expenses"),
        })
    }
}

fn join_code_index() -> IndexModel {
    IndexModel::builder()
        .keys(doc! { "join_code": 1 })
        .options(IndexOptions::builder().unique(true).build())
        .build()
}

fn is_duplicate_key(error: &mongodb::error::Error) -> bool {
    matches!(
        error.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(write_error)) if write_error.code == DUPLICATE_KEY
    )
}

// Titles are matched literally, so regex metacharacters in a search are escaped
fn escape_regex(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if "\\.+*?()|[]{}^$#&-~".contains(c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn personal_filter(owner: &str, filter: &ExpenseFilter) -> Document {
    let mut query = doc! { "ledger.kind": "personal", "ledger.owner": owner };
    if let Some(category) = &filter.category {
        query.insert("category", category.as_str());
    }
    if let Some(search) = filter.search.as_deref().map(str::trim) {
        if !search.is_empty() {
            query.insert("title", doc! { "$regex": escape_regex(search), "$options": "i" });
        }
    }
    query
}

fn patch_document(patch: &ExpensePatch) -> Result<Document, StoreError> {
    let mut set = Document::new();
    if let Some(title) = &patch.title {
        set.insert("title", title.as_str());
    }
    if let Some(amount) = &patch.amount {
        set.insert("amount", bson::to_bson(amount)?);
    }
    if let Some(category) = &patch.category {
        set.insert("category", category.as_str());
    }
    if let Some(date) = &patch.date {
        set.insert("date", bson::to_bson(date)?);
    }
    Ok(set)
}

#[async_trait]
impl Store for MongoStore {
    async fn upsert_member(&self, member: Member) -> Result<(), StoreError> {
        let options = ReplaceOptions::builder().upsert(true).build();
        self.members
            .replace_one(doc! { "id": member.id.as_str() }, &member, options)
            .await?;
        Ok(())
    }

    async fn members(&self, ids: &MemberSet) -> Result<Vec<Member>, StoreError> {
        let ids: Vec<&str> = ids.iter().map(String::as_str).collect();
        let cursor = self.members.find(doc! { "id": { "$in": ids } }, None).await?;
        Ok(cursor.try_collect().await?)
    }

    async fn insert_group(&self, group: Group) -> Result<(), StoreError> {
        match self.groups.insert_one(&group, None).await {
            Ok(_) => Ok(()),
            Err(error) if is_duplicate_key(&error) => Err(StoreError::Duplicate {
                entity_type: "Group",
                identifier: group.join_code,
            }),
            Err(error) => Err(error.into()),
        }
    }

    async fn group(&self, id: &str) -> Result<Option<Group>, StoreError> {
        Ok(self.groups.find_one(doc! { "id": id }, None).await?)
    }

    async fn group_by_join_code(&self, join_code: &str) -> Result<Option<Group>, StoreError> {
        Ok(self
            .groups
            .find_one(doc! { "join_code": join_code }, None)
            .await?)
    }

    async fn add_group_member(&self, group: &str, member: &str) -> Result<bool, StoreError> {
        let result = self
            .groups
            .update_one(
                doc! { "id": group },
                doc! { "$addToSet": { "members": member } },
                None,
            )
            .await?;
        Ok(result.matched_count > 0)
    }

    async fn groups_of(&self, member: &str) -> Result<Vec<Group>, StoreError> {
        let cursor = self.groups.find(doc! { "members": member }, None).await?;
        Ok(cursor.try_collect().await?)
    }

    async fn insert_expense(&self, expense: Expense) -> Result<(), StoreError> {
        self.expenses.insert_one(expense, None).await?;
        Ok(())
    }

    async fn expense(&self, id: &str) -> Result<Option<Expense>, StoreError> {
        Ok(self.expenses.find_one(doc! { "id": id }, None).await?)
    }

    async fn group_expenses(&self, group: &str) -> Result<Vec<Expense>, StoreError> {
        let cursor = self
            .expenses
            .find(doc! { "ledger.kind": "group", "ledger.group": group }, None)
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn personal_expenses(
        &self,
        owner: &str,
        filter: &ExpenseFilter,
    ) -> Result<Vec<Expense>, StoreError> {
        let cursor = self
            .expenses
            .find(personal_filter(owner, filter), None)
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn update_expense(&self, id: &str, patch: &ExpensePatch) -> Result<bool, StoreError> {
        let set = patch_document(patch)?;
        if set.is_empty() {
            return Ok(self.expense(id).await?.is_some());
        }
        let result = self
            .expenses
            .update_one(doc! { "id": id }, doc! { "$set": set }, None)
            .await?;
        Ok(result.matched_count > 0)
    }

    async fn delete_expense(&self, id: &str) -> Result<bool, StoreError> {
        let result = self.expenses.delete_one(doc! { "id": id }, None).await?;
        Ok(result.deleted_count > 0)
    }

    async fn mark_settled(&self, expense: &str, member: &str) -> Result<bool, StoreError> {
        let result = self
            .expenses
            .update_one(
                doc! { "id": expense, "ledger.kind": "group" },
                doc! { "$addToSet": { "ledger.settled_by": member } },
                None,
            )
            .await?;
        Ok(result.matched_count > 0)
    }

    async fn unmark_settled(&self, expense: &str, member: &str) -> Result<bool, StoreError> {
        let result = self
            .expenses
            .update_one(
                doc! { "id": expense, "ledger.kind": "group" },
                doc! { "$pull": { "ledger.settled_by": member } },
                None,
            )
            .await?;
        Ok(result.matched_count > 0)
    }
}
