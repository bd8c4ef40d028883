//! Command handlers for the `aequitas` binary.
//!
//! Each handler reads through a [`QueryClient`] exactly like a screen
//! would and returns the JSON document to print.

use std::num::NonZeroU32;

use aequitas_api_types::{NewCategory, NewPot};
use serde::Serialize;
use serde_json::{Value, json};
use time::OffsetDateTime;
use tracing::info;

use crate::cache::{QueryClient, WriteResult};
use crate::config::{
    CategoriesCommand, Command, ExpensesArgs, PotContributionArgs, PotCreateArgs, PotsCommand,
    SummaryArgs,
};
use crate::hooks::{self, Contribution};
use crate::params::{ExpenseFilters, SortOrder, SortState, SummaryParams};

use super::error::AppError;

pub async fn execute(client: &QueryClient, command: Command) -> Result<Value, AppError> {
    match command {
        Command::Expenses(args) => list_expenses(client, args).await,
        Command::Summary(args) => monthly_summary(client, args).await,
        Command::Pots(PotsCommand::List) => to_json(&hooks::use_pots(client).resolve().await?),
        Command::Pots(PotsCommand::Add(args)) => contribute(client, args).await,
        Command::Pots(PotsCommand::Create(args)) => create_pot(client, args).await,
        Command::Pots(PotsCommand::Delete(args)) => {
            let result = hooks::delete_pot(client).mutate(args.id).await?;
            write_result_json(result)
        }
        Command::Categories(CategoriesCommand::List) => {
            to_json(&hooks::use_categories(client).resolve().await?)
        }
        Command::Categories(CategoriesCommand::Create { name }) => {
            let result = hooks::create_category(client)
                .mutate(NewCategory { name })
                .await?;
            write_result_json(result)
        }
        Command::Categories(CategoriesCommand::Delete(args)) => {
            let result = hooks::delete_category(client).mutate(args.id).await?;
            write_result_json(result)
        }
        Command::Analysis => to_json(&hooks::use_ai_analysis(client).resolve().await?),
        Command::Dashboard => dashboard(client).await,
    }
}

/// Translate list arguments into filters the same way the list screen does.
pub fn expense_filters(args: &ExpensesArgs, default_page_size: NonZeroU32) -> ExpenseFilters {
    let page_size = args
        .page_size
        .and_then(NonZeroU32::new)
        .unwrap_or(default_page_size);
    let mut filters = ExpenseFilters::new(page_size);
    if let Some(search) = args.search.as_ref() {
        filters.set_search(search.as_str());
    }
    filters.set_category(args.category.clone());
    filters.set_avoidable(args.avoidable);
    filters.set_date_range(args.start_date.clone(), args.end_date.clone());
    if let Some(field) = args.sort {
        let order = if args.ascending {
            SortOrder::Asc
        } else {
            SortOrder::Desc
        };
        filters.set_sort(Some(SortState {
            field: field.into(),
            order,
        }));
    }
    // Last, since every other setter resets the page.
    filters.set_page(args.page);
    filters
}

async fn list_expenses(client: &QueryClient, args: ExpensesArgs) -> Result<Value, AppError> {
    let filters = expense_filters(&args, client.config().page_size_non_zero());
    let params = filters.params();
    let expenses = hooks::use_expenses(client, &params).resolve().await?;
    Ok(json!({
        "page": filters.page(),
        "page_size": filters.page_size(),
        "expenses": expenses,
    }))
}

fn summary_params(args: &SummaryArgs, today: time::Date) -> SummaryParams {
    let current = SummaryParams::for_date(today);
    SummaryParams::new(
        args.year.unwrap_or(current.year),
        args.month.unwrap_or(current.month),
    )
}

async fn monthly_summary(client: &QueryClient, args: SummaryArgs) -> Result<Value, AppError> {
    let params = summary_params(&args, OffsetDateTime::now_utc().date());
    let summary = hooks::use_monthly_summary(client, params.year, params.month)
        .resolve()
        .await?;
    to_json(&summary)
}

async fn contribute(client: &QueryClient, args: PotContributionArgs) -> Result<Value, AppError> {
    let pots = hooks::use_pots(client);
    let current = pots.resolve().await?;
    let contribution = Contribution::validate(&current, &args.id, args.amount)?;
    info!(
        pot_id = %contribution.pot_id,
        amount = %contribution.amount,
        new_total = %contribution.new_total,
        "contributing to savings goal"
    );
    hooks::add_to_pot(client).mutate(contribution).await?;
    // The write invalidated the list, so this reads the server's view.
    to_json(&pots.resolve().await?)
}

async fn create_pot(client: &QueryClient, args: PotCreateArgs) -> Result<Value, AppError> {
    if !args.target.is_positive() {
        return Err(AppError::validation("target must be greater than zero"));
    }
    let pot = NewPot {
        title: args.title,
        target_amount: args.target,
        current_amount: args.current,
        target_date: args.date,
        priority: args.priority.into(),
    };
    let result = hooks::create_pot(client).mutate(pot).await?;
    write_result_json(result)
}

async fn dashboard(client: &QueryClient) -> Result<Value, AppError> {
    let params = SummaryParams::for_date(OffsetDateTime::now_utc().date());
    let summary = hooks::use_monthly_summary(client, params.year, params.month);
    let recent = hooks::use_recent_expenses(client);
    let pots = hooks::use_pots(client);
    let analysis = hooks::use_ai_analysis(client);

    let (summary, recent, pots, analysis) = tokio::try_join!(
        summary.resolve(),
        recent.resolve(),
        pots.resolve(),
        analysis.resolve(),
    )?;
    Ok(json!({
        "summary": summary,
        "recent_expenses": recent,
        "pots": pots,
        "analysis": analysis,
    }))
}

fn to_json<T: Serialize>(value: &T) -> Result<Value, AppError> {
    serde_json::to_value(value)
        .map_err(|err| AppError::unexpected(format!("failed to encode output: {err}")))
}

fn write_result_json(result: WriteResult) -> Result<Value, AppError> {
    match result {
        WriteResult::Expense(expense) => to_json(&expense),
        WriteResult::Pot(pot) => to_json(&pot),
        WriteResult::Category(category) => to_json(&category),
        WriteResult::Deleted => Ok(json!({ "deleted": true })),
    }
}
