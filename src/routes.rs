use crate::auth::RequestContext;
use crate::balance::{personal_total, round_balances, Balances, SettlementEngine, SplitPolicy};
use crate::error::ServiceError;
use crate::exchange::{get_exchanges_from_group, Exchange};
use crate::schemas::{
    normalize_join_code, Expense, ExpenseFilter, ExpensePatch, Group, Ledger, Member,
};
use crate::store::Store;
use actix_web::{delete, get, post, put, web, HttpResponse};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Engine shared by all handlers, with the split policy chosen at startup.
pub type Engine = SettlementEngine<Box<dyn SplitPolicy>>;

#[derive(Deserialize, Serialize)]
struct NameJson {
    name: String,
}

#[derive(Deserialize, Serialize)]
struct JoinCodeJson {
    join_code: String,
}

#[derive(Deserialize, Serialize)]
struct NewExpenseJson {
    title: String,
    amount: Decimal,
    category: Option<String>,
    group_id: Option<String>,
    date: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
struct GroupDetail {
    group: Group,
    members: Vec<Member>,
    expenses: Vec<Expense>,
    balances: Balances,
}

#[derive(Serialize)]
struct PersonalExpenses {
    expenses: Vec<Expense>,
    total: Decimal,
}

fn require_text(field: &str, value: &str) -> Result<(), ServiceError> {
    if value.trim().is_empty() {
        return Err(ServiceError::BadRequest(format!("{field} is required")));
    }
    Ok(())
}

fn require_positive(amount: Decimal) -> Result<(), ServiceError> {
    if amount <= Decimal::ZERO {
        return Err(ServiceError::BadRequest(format!(
            "amount must be positive, got {amount}"
        )));
    }
    Ok(())
}

async fn find_group(store: &dyn Store, id: &str) -> Result<Group, ServiceError> {
    store
        .group(id)
        .await?
        .ok_or_else(|| ServiceError::not_found("Group", id))
}

async fn find_expense(store: &dyn Store, id: &str) -> Result<Expense, ServiceError> {
    store
        .expense(id)
        .await?
        .ok_or_else(|| ServiceError::not_found("Expense", id))
}

fn require_member(group: &Group, context: &RequestContext) -> Result<(), ServiceError> {
    if !group.is_member(&context.member) {
        return Err(ServiceError::Forbidden(format!(
            "{} is not a member of group {}",
            context.member, group.id
        )));
    }
    Ok(())
}

/// Loads a group the caller belongs to, together with its expenses.
async fn load_ledger(
    store: &dyn Store,
    id: &str,
    context: &RequestContext,
) -> Result<(Group, Vec<Expense>), ServiceError> {
    let group = find_group(store, id).await?;
    require_member(&group, context)?;
    let expenses = store.group_expenses(&group.id).await?;
    Ok((group, expenses))
}

fn group_balances(
    engine: &Engine,
    group: &Group,
    expenses: &[Expense],
) -> Result<Balances, ServiceError> {
    let views: Vec<_> = expenses.iter().filter_map(Expense::as_group_expense).collect();
    Ok(engine.compute_balances(&group.members, &views)?)
}

fn require_payer(expense: &Expense, context: &RequestContext) -> Result<(), ServiceError> {
    if expense.payer() != &context.member {
        tracing::warn!(
            expense = %expense.id,
            member = %context.member,
            "rejected change to another member's expense"
        );
        return Err(ServiceError::Forbidden(format!(
            "only {} can change expense {}",
            expense.payer(),
            expense.id
        )));
    }
    Ok(())
}

#[put("/members/{id}")]
async fn put_member(
    store: web::Data<dyn Store>,
    context: RequestContext,
    id: web::Path<String>,
    json: web::Json<NameJson>,
) -> Result<HttpResponse, ServiceError> {
    let id = id.into_inner();
    if id != context.member {
        return Err(ServiceError::Forbidden(format!(
            "{} cannot rename member {id}",
            context.member
        )));
    }
    let NameJson { name } = json.into_inner();
    require_text("name", &name)?;
    let member = Member { id, name };
    store.upsert_member(member.clone()).await?;
    Ok(HttpResponse::Ok().json(member))
}

#[post("/groups")]
async fn create_group(
    store: web::Data<dyn Store>,
    context: RequestContext,
    json: web::Json<NameJson>,
) -> Result<HttpResponse, ServiceError> {
    let NameJson { name } = json.into_inner();
    require_text("name", &name)?;
    let group = Group::new(name, context.member);
    store.insert_group(group.clone()).await?;
    tracing::info!(group = %group.id, creator = %group.created_by, "group created");
    Ok(HttpResponse::Created().json(group))
}

#[post("/groups/join")]
async fn join_group(
    store: web::Data<dyn Store>,
    context: RequestContext,
    json: web::Json<JoinCodeJson>,
) -> Result<HttpResponse, ServiceError> {
    let code = normalize_join_code(&json.join_code);
    let group = store
        .group_by_join_code(&code)
        .await?
        .ok_or_else(|| ServiceError::not_found("Group with join code", code.as_str()))?;

    if !group.is_member(&context.member) {
        store.add_group_member(&group.id, &context.member).await?;
        tracing::info!(group = %group.id, member = %context.member, "member joined group");
    }

    let group = find_group(store.get_ref(), &group.id).await?;
    Ok(HttpResponse::Ok().json(group))
}

#[get("/groups")]
async fn list_groups(
    store: web::Data<dyn Store>,
    context: RequestContext,
) -> Result<HttpResponse, ServiceError> {
    let groups = store.groups_of(&context.member).await?;
    Ok(HttpResponse::Ok().json(groups))
}

#[get("/groups/{id}")]
async fn get_group(
    store: web::Data<dyn Store>,
    engine: web::Data<Engine>,
    context: RequestContext,
    id: web::Path<String>,
) -> Result<HttpResponse, ServiceError> {
    let (group, expenses) = load_ledger(store.get_ref(), &id, &context).await?;
    let balances = round_balances(&group_balances(engine.get_ref(), &group, &expenses)?);
    let members = store.members(&group.members).await?;
    Ok(HttpResponse::Ok().json(GroupDetail {
        group,
        members,
        expenses,
        balances,
    }))
}

#[get("/groups/{id}/balance")]
async fn get_balance(
    store: web::Data<dyn Store>,
    engine: web::Data<Engine>,
    context: RequestContext,
    id: web::Path<String>,
) -> Result<HttpResponse, ServiceError> {
    let (group, expenses) = load_ledger(store.get_ref(), &id, &context).await?;
    let balances = group_balances(engine.get_ref(), &group, &expenses)?;
    Ok(HttpResponse::Ok().json(round_balances(&balances)))
}

#[get("/groups/{id}/exchanges")]
async fn get_exchanges(
    store: web::Data<dyn Store>,
    engine: web::Data<Engine>,
    context: RequestContext,
    id: web::Path<String>,
) -> Result<HttpResponse, ServiceError> {
    let (group, expenses) = load_ledger(store.get_ref(), &id, &context).await?;
    let views: Vec<_> = expenses.iter().filter_map(Expense::as_group_expense).collect();
    let exchanges: Vec<Exchange> =
        get_exchanges_from_group(engine.get_ref(), &group.members, &views)?;
    Ok(HttpResponse::Ok().json(exchanges))
}

#[post("/expenses")]
async fn add_expense(
    store: web::Data<dyn Store>,
    context: RequestContext,
    json: web::Json<NewExpenseJson>,
) -> Result<HttpResponse, ServiceError> {
    let new = json.into_inner();
    require_text("title", &new.title)?;
    require_positive(new.amount)?;

    let mut expense = match new.group_id.as_deref().filter(|id| !id.is_empty()) {
        Some(group_id) => {
            let group = find_group(store.get_ref(), group_id).await?;
            require_member(&group, &context)?;
            Expense::for_group(new.title, new.amount, &group, context.member)
        }
        None => Expense::personal(new.title, new.amount, context.member),
    };
    expense.category = new.category.filter(|category| !category.trim().is_empty());
    if let Some(date) = new.date {
        expense.date = date;
    }

    store.insert_expense(expense.clone()).await?;
    tracing::info!(
        expense = %expense.id,
        group = ?expense.group(),
        amount = %expense.amount,
        "expense added"
    );
    Ok(HttpResponse::Created().json(expense))
}

#[get("/expenses")]
async fn list_personal_expenses(
    store: web::Data<dyn Store>,
    context: RequestContext,
    filter: web::Query<ExpenseFilter>,
) -> Result<HttpResponse, ServiceError> {
    let expenses = store
        .personal_expenses(&context.member, &filter.into_inner())
        .await?;
    let total = personal_total(&expenses, &context.member)?;
    Ok(HttpResponse::Ok().json(PersonalExpenses { expenses, total }))
}

#[put("/expenses/{id}")]
async fn edit_expense(
    store: web::Data<dyn Store>,
    context: RequestContext,
    id: web::Path<String>,
    json: web::Json<ExpensePatch>,
) -> Result<HttpResponse, ServiceError> {
    let patch = json.into_inner();
    if let Some(title) = &patch.title {
        require_text("title", title)?;
    }
    if let Some(amount) = patch.amount {
        require_positive(amount)?;
    }

    let expense = find_expense(store.get_ref(), &id).await?;
    require_payer(&expense, &context)?;

    store.update_expense(&expense.id, &patch).await?;
    let expense = find_expense(store.get_ref(), &expense.id).await?;
    Ok(HttpResponse::Ok().json(expense))
}

#[delete("/expenses/{id}")]
async fn delete_expense(
    store: web::Data<dyn Store>,
    context: RequestContext,
    id: web::Path<String>,
) -> Result<HttpResponse, ServiceError> {
    let expense = find_expense(store.get_ref(), &id).await?;
    require_payer(&expense, &context)?;
    store.delete_expense(&expense.id).await?;
    tracing::info!(expense = %expense.id, "expense deleted");
    Ok(HttpResponse::Ok().body("Expense deleted"))
}

/// Loads a group expense and checks the caller shares in it.
async fn settleable_expense(
    store: &dyn Store,
    engine: &Engine,
    id: &str,
    context: &RequestContext,
) -> Result<Expense, ServiceError> {
    let expense = find_expense(store, id).await?;
    let Ledger::Group { group, payer, .. } = &expense.ledger else {
        return Err(ServiceError::BadRequest(format!(
            "expense {id} is personal and cannot be settled"
        )));
    };
    if payer == &context.member {
        return Err(ServiceError::BadRequest(
            "the payer cannot settle their own expense".to_string(),
        ));
    }

    let group = find_group(store, group).await?;
    let shares = expense
        .as_group_expense()
        .map(|view| {
            engine
                .policy()
                .participants(&group.members, &view)
                .contains(&context.member)
        })
        .unwrap_or(false);
    if !shares {
        return Err(ServiceError::Forbidden(format!(
            "{} does not share in expense {id}",
            context.member
        )));
    }
    Ok(expense)
}

#[post("/expenses/{id}/pay")]
async fn pay_expense(
    store: web::Data<dyn Store>,
    engine: web::Data<Engine>,
    context: RequestContext,
    id: web::Path<String>,
) -> Result<HttpResponse, ServiceError> {
    let expense = settleable_expense(store.get_ref(), engine.get_ref(), &id, &context).await?;
    store.mark_settled(&expense.id, &context.member).await?;
    tracing::info!(expense = %expense.id, member = %context.member, "share settled");
    let expense = find_expense(store.get_ref(), &expense.id).await?;
    Ok(HttpResponse::Ok().json(expense))
}

#[post("/expenses/{id}/unpay")]
async fn unpay_expense(
    store: web::Data<dyn Store>,
    context: RequestContext,
    id: web::Path<String>,
) -> Result<HttpResponse, ServiceError> {
    let expense = find_expense(store.get_ref(), &id).await?;
    let Some(group) = expense.group() else {
        return Err(ServiceError::BadRequest(format!(
            "expense {} is personal and cannot be settled",
            expense.id
        )));
    };
    let group = find_group(store.get_ref(), group).await?;
    require_member(&group, &context)?;
    store.unmark_settled(&expense.id, &context.member).await?;
    tracing::info!(expense = %expense.id, member = %context.member, "share unsettled");
    let expense = find_expense(store.get_ref(), &expense.id).await?;
    Ok(HttpResponse::Ok().json(expense))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(put_member)
        .service(join_group)
        .service(create_group)
        .service(list_groups)
        .service(get_balance)
        .service(get_exchanges)
        .service(get_group)
        .service(add_expense)
        .service(list_personal_expenses)
        .service(edit_expense)
        .service(delete_expense)
        .service(pay_expense)
        .service(unpay_expense);
}
