use std::{path::PathBuf, str::FromStr};

use clap::{ArgGroup, Args, Parser, Subcommand, ValueEnum};
use engine::{
    Engine, ExpenseCmd, JsonStore, MemberCmd, Money, SplitSpec, SummaryKind, SystemClock,
};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use error::AppError;
use settings::{Overrides, Settings};

mod error;
mod settings;

#[derive(Parser, Debug)]
#[command(name = "saldo")]
#[command(about = "Shared expense lists: record expenses, settle up, inspect balances")]
struct Cli {
    /// Configuration file. Defaults to `config/saldo.toml` when present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Data directory (also read from `SALDO_DATA_DIR`).
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Log level (also read from `SALDO_LEVEL`).
    #[arg(long, global = true)]
    level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    List(List),
    Group(Group),
}

#[derive(Args, Debug)]
struct List {
    #[command(subcommand)]
    command: ListCommand,
}

#[derive(Subcommand, Debug)]
enum ListCommand {
    New(NewListArgs),
    AddMember(ListMemberArgs),
    RemoveMember(RemoveMemberArgs),
    AddExpense(ExpenseArgs),
    RemoveItem(ItemArgs),
    RenameItem(RenameItemArgs),
    Settle(ListArgs),
    Close(CloseArgs),
    Pending(ListArgs),
    Report(ReportArgs),
    Statement(StatementArgs),
    Undo(ListArgs),
    Redo(ListArgs),
}

#[derive(Args, Debug)]
struct Group {
    #[command(subcommand)]
    command: GroupCommand,
}

#[derive(Subcommand, Debug)]
enum GroupCommand {
    New(NewGroupArgs),
    AddMember(GroupMemberArgs),
    RemoveMember(GroupRemoveMemberArgs),
    AddList(GroupListArgs),
    RemoveList(GroupListArgs),
    Report(ReportArgs),
}

#[derive(Args, Debug)]
struct NewListArgs {
    name: String,
    /// Group the list belongs to.
    #[arg(long)]
    group: Option<String>,
}

#[derive(Args, Debug)]
struct ListArgs {
    /// List name or id.
    list: String,
}

#[derive(Args, Debug)]
struct MemberArgs {
    name: String,
    #[arg(long)]
    user_id: Option<Uuid>,
    /// Sharing weight as `NAME=VALUE`; may be repeated.
    #[arg(long = "weight", value_parser = parse_weight)]
    weights: Vec<(String, Decimal)>,
}

#[derive(Args, Debug)]
struct ListMemberArgs {
    list: String,
    #[command(flatten)]
    member: MemberArgs,
}

#[derive(Args, Debug)]
struct RemoveMemberArgs {
    list: String,
    member: String,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
enum SplitKind {
    #[default]
    Equal,
    Percentages,
    Amounts,
    Weighted,
}

#[derive(Args, Debug)]
struct ExpenseArgs {
    list: String,
    name: String,
    #[arg(long)]
    payer: String,
    /// Amount in currency units, e.g. `12.50`.
    #[arg(long)]
    amount: String,
    /// Participant sharing the expense; may be repeated. Defaults to the
    /// people named by `--share`, then to every member.
    #[arg(long = "with")]
    with: Vec<String>,
    #[arg(long, value_enum, default_value_t = SplitKind::Equal)]
    split: SplitKind,
    /// Share as `NAME=VALUE`: a fraction (`0.25`) or percentage (`25%`) for
    /// `percentages`, an amount for `amounts`.
    #[arg(long = "share")]
    shares: Vec<String>,
    /// Sharing weight used by the `weighted` split.
    #[arg(long)]
    weight_name: Option<String>,
}

#[derive(Args, Debug)]
struct ItemArgs {
    list: String,
    item: String,
}

#[derive(Args, Debug)]
struct RenameItemArgs {
    list: String,
    item: String,
    name: String,
}

#[derive(Args, Debug)]
#[command(group(ArgGroup::new("target").required(true).args(["transaction", "member"])))]
struct CloseArgs {
    list: String,
    transaction: Option<String>,
    /// Close every pending transaction of this member instead.
    #[arg(long)]
    member: Option<String>,
}

#[derive(Args, Debug)]
struct ReportArgs {
    /// List or group name or id.
    key: String,
    /// Also write the summary to the data directory.
    #[arg(long)]
    save: bool,
}

#[derive(Args, Debug)]
struct StatementArgs {
    list: String,
    member: String,
    /// Only transactions of the latest settlement.
    #[arg(long)]
    current: bool,
}

#[derive(Args, Debug)]
struct NewGroupArgs {
    name: String,
}

#[derive(Args, Debug)]
struct GroupMemberArgs {
    group: String,
    #[command(flatten)]
    member: MemberArgs,
}

#[derive(Args, Debug)]
struct GroupRemoveMemberArgs {
    group: String,
    member: String,
}

#[derive(Args, Debug)]
struct GroupListArgs {
    group: String,
    list: String,
}

fn main() -> Result<(), AppError> {
    let cli = Cli::parse();
    let settings = Settings::new(&Overrides {
        file: cli.config.as_deref(),
        data_dir: cli.data_dir.as_deref(),
        level: cli.level.as_deref(),
    })?;

    tracing_subscriber::fmt()
        .with_env_filter(format!(
            "saldo={level},engine={level}",
            level = settings.level
        ))
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!("using data directory {}", settings.data_dir.display());
    let mut engine = Engine::builder()
        .store(JsonStore::new(settings.data_dir.clone())?)
        .clock(SystemClock)
        .build()?;

    let output = execute(&mut engine, cli.command)?;
    if !output.is_empty() {
        println!("{output}");
    }
    Ok(())
}

fn execute(engine: &mut Engine, command: Command) -> Result<String, AppError> {
    match command {
        Command::List(list) => execute_list(engine, list.command),
        Command::Group(group) => execute_group(engine, group.command),
    }
}

fn execute_list(engine: &mut Engine, command: ListCommand) -> Result<String, AppError> {
    match command {
        ListCommand::New(args) => {
            let id = engine.new_list(&args.name, args.group.as_deref())?;
            Ok(id.to_string())
        }
        ListCommand::AddMember(args) => {
            let id = engine.add_list_member(&args.list, member_cmd(args.member))?;
            Ok(id.to_string())
        }
        ListCommand::RemoveMember(args) => {
            let removed = engine.remove_list_member(&args.list, &args.member)?;
            Ok(outcome(removed, "removed", "not a member"))
        }
        ListCommand::AddExpense(args) => {
            let id = engine.add_expense(expense_cmd(args)?)?;
            Ok(id.to_string())
        }
        ListCommand::RemoveItem(args) => {
            let removed = engine.remove_item(&args.list, &args.item)?;
            Ok(outcome(removed, "removed", "no such item"))
        }
        ListCommand::RenameItem(args) => {
            engine.rename_item(&args.list, &args.item, &args.name)?;
            Ok(String::new())
        }
        ListCommand::Settle(args) => to_json(&engine.settle_up(&args.list)?),
        ListCommand::Close(args) => match (args.transaction, args.member) {
            (Some(tx), _) => match engine.close_transaction(&args.list, &tx)? {
                Some(closed) => to_json(&closed),
                None => Ok(format!("{tx} is not pending")),
            },
            (None, Some(member)) => {
                to_json(&engine.close_member_transactions(&args.list, &member)?)
            }
            (None, None) => Err(AppError::Argument(
                "a transaction id or --member is required".to_string(),
            )),
        },
        ListCommand::Pending(args) => to_json(&engine.pending_transactions(&args.list)?),
        ListCommand::Report(args) => report(engine, SummaryKind::List, args),
        ListCommand::Statement(args) => Ok(engine
            .statement(&args.list, &args.member, args.current)?
            .join("\n")),
        ListCommand::Undo(args) => Ok(match engine.undo(&args.list)? {
            Some(done) => format!("undone: {done}"),
            None => "nothing to undo".to_string(),
        }),
        ListCommand::Redo(args) => Ok(match engine.redo(&args.list)? {
            Some(done) => format!("redone: {done}"),
            None => "nothing to redo".to_string(),
        }),
    }
}

fn execute_group(engine: &mut Engine, command: GroupCommand) -> Result<String, AppError> {
    match command {
        GroupCommand::New(args) => Ok(engine.new_group(&args.name)?.to_string()),
        GroupCommand::AddMember(args) => {
            let id = engine.add_group_member(&args.group, member_cmd(args.member))?;
            Ok(id.to_string())
        }
        GroupCommand::RemoveMember(args) => {
            let removed = engine.remove_group_member(&args.group, &args.member)?;
            Ok(outcome(removed, "removed", "not a member"))
        }
        GroupCommand::AddList(args) => {
            let added = engine.add_list_to_group(&args.group, &args.list)?;
            Ok(outcome(added, "added", "already in the group"))
        }
        GroupCommand::RemoveList(args) => {
            let removed = engine.remove_list_from_group(&args.group, &args.list)?;
            Ok(outcome(removed, "removed", "not in the group"))
        }
        GroupCommand::Report(args) => report(engine, SummaryKind::Group, args),
    }
}

fn report(engine: &mut Engine, kind: SummaryKind, args: ReportArgs) -> Result<String, AppError> {
    if args.save {
        let key = engine.save_report(kind, &args.key)?;
        tracing::info!("summary written to {key}");
    }
    to_json(&engine.report(kind, &args.key)?)
}

fn outcome(done: bool, yes: &str, no: &str) -> String {
    let text = if done { yes } else { no };
    text.to_string()
}

fn to_json<T: Serialize>(value: &T) -> Result<String, AppError> {
    Ok(serde_json::to_string_pretty(value)?)
}

fn member_cmd(args: MemberArgs) -> MemberCmd {
    let mut cmd = MemberCmd::new(args.name);
    if let Some(user_id) = args.user_id {
        cmd = cmd.user_id(user_id);
    }
    for (name, value) in args.weights {
        cmd = cmd.weight(name, value);
    }
    cmd
}

fn expense_cmd(args: ExpenseArgs) -> Result<ExpenseCmd, AppError> {
    let amount = Money::from_str(&args.amount)?;
    let split = split_spec(args.split, &args.shares, args.weight_name)?;
    Ok(ExpenseCmd::new(args.list, args.name, args.payer, amount)
        .with_all(args.with)
        .split(split))
}

fn split_spec(
    kind: SplitKind,
    shares: &[String],
    weight_name: Option<String>,
) -> Result<SplitSpec, AppError> {
    if !shares.is_empty() && !matches!(kind, SplitKind::Percentages | SplitKind::Amounts) {
        return Err(AppError::Argument(
            "--share only applies to the percentages and amounts splits".to_string(),
        ));
    }
    if weight_name.is_some() && kind != SplitKind::Weighted {
        return Err(AppError::Argument(
            "--weight-name only applies to the weighted split".to_string(),
        ));
    }

    match kind {
        SplitKind::Equal => Ok(SplitSpec::Equal),
        SplitKind::Percentages => shares
            .iter()
            .map(|raw| {
                let (name, value) = parse_share(raw)?;
                Ok((name, parse_fraction(value)?))
            })
            .collect::<Result<_, AppError>>()
            .map(SplitSpec::Percentages),
        SplitKind::Amounts => shares
            .iter()
            .map(|raw| {
                let (name, value) = parse_share(raw)?;
                Ok((name, Money::from_str(value)?))
            })
            .collect::<Result<_, AppError>>()
            .map(SplitSpec::Amounts),
        SplitKind::Weighted => Ok(SplitSpec::Weighted(
            weight_name.unwrap_or_else(|| "weight".to_string()),
        )),
    }
}

/// Splits `NAME=VALUE`.
fn parse_share(raw: &str) -> Result<(String, &str), AppError> {
    match raw.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.trim()))
        }
        _ => Err(AppError::Argument(format!(
            "expected NAME=VALUE, got \"{raw}\""
        ))),
    }
}

/// `0.25` and `25%` both read as one quarter.
fn parse_fraction(raw: &str) -> Result<Decimal, AppError> {
    let invalid = |_| AppError::Argument(format!("invalid percentage: {raw}"));
    match raw.strip_suffix('%') {
        Some(percent) => {
            Ok(Decimal::from_str(percent.trim()).map_err(invalid)? / Decimal::ONE_HUNDRED)
        }
        None => Decimal::from_str(raw).map_err(invalid),
    }
}

fn parse_weight(raw: &str) -> Result<(String, Decimal), String> {
    let (name, value) = parse_share(raw).map_err(|err| err.to_string())?;
    let value = Decimal::from_str(value).map_err(|err| format!("invalid weight {value}: {err}"))?;
    Ok((name, value))
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn run(engine: &mut Engine, args: &[&str]) -> Result<String, AppError> {
        let cli = Cli::try_parse_from(std::iter::once("saldo").chain(args.iter().copied()))
            .map_err(|err| AppError::Argument(err.to_string()))?;
        execute(engine, cli.command)
    }

    fn trip() -> Engine {
        let mut engine = Engine::builder().build().unwrap();
        run(&mut engine, &["list", "new", "Trip"]).unwrap();
        for name in ["Ann", "Bob"] {
            run(&mut engine, &["list", "add-member", "Trip", name]).unwrap();
        }
        engine
    }

    #[rstest]
    #[case("0.25", "0.25")]
    #[case("25%", "0.25")]
    #[case(" 12.5 %", "0.125")]
    fn fractions_accept_percent_suffix(#[case] raw: &str, #[case] expected: &str) {
        assert_eq!(
            parse_fraction(raw.trim()).unwrap(),
            Decimal::from_str(expected).unwrap()
        );
    }

    #[rstest]
    #[case("Ann")]
    #[case("=3")]
    fn shares_need_a_name_and_a_value(#[case] raw: &str) {
        assert!(matches!(parse_share(raw), Err(AppError::Argument(_))));
    }

    #[test]
    fn weight_flag_is_parsed() {
        assert_eq!(
            parse_weight("nights=3").unwrap(),
            ("nights".to_string(), Decimal::from(3))
        );
        assert!(parse_weight("nights=lots").is_err());
    }

    #[test]
    fn share_flags_need_a_matching_split() {
        let shares = vec!["Ann=10".to_string()];
        assert!(matches!(
            split_spec(SplitKind::Equal, &shares, None),
            Err(AppError::Argument(_))
        ));
        assert_eq!(
            split_spec(SplitKind::Amounts, &shares, None).unwrap(),
            SplitSpec::Amounts(vec![("Ann".to_string(), Money::new(1000))])
        );
        assert_eq!(
            split_spec(SplitKind::Weighted, &[], None).unwrap(),
            SplitSpec::Weighted("weight".to_string())
        );
    }

    #[test]
    fn expense_settle_and_close_through_the_cli() {
        let mut engine = trip();
        let id = run(
            &mut engine,
            &[
                "list", "add-expense", "Trip", "Dinner", "--payer", "Ann", "--amount", "40",
                "--split", "percentages", "--share", "Ann=25%", "--share", "Bob=75%",
            ],
        )
        .unwrap();
        assert_eq!(id, "it0000");

        let settled: Vec<api_types::transaction::TransactionRecord> =
            serde_json::from_str(&run(&mut engine, &["list", "settle", "Trip"]).unwrap())
                .unwrap();
        assert_eq!(settled.len(), 1);
        assert_eq!(settled[0].amount, 3000);

        assert_eq!(
            run(&mut engine, &["list", "statement", "Trip", "Bob"]).unwrap(),
            "Bob owes 30.00€ to Ann"
        );
        run(&mut engine, &["list", "close", "Trip", "--member", "Bob"]).unwrap();
        assert_eq!(
            run(&mut engine, &["list", "pending", "Trip"]).unwrap(),
            "[]"
        );
    }

    #[test]
    fn lists_move_in_and_out_of_groups() {
        let mut engine = Engine::builder().build().unwrap();
        run(&mut engine, &["group", "new", "Flat"]).unwrap();
        run(&mut engine, &["group", "add-member", "Flat", "Ann"]).unwrap();
        run(&mut engine, &["list", "new", "Bills", "--group", "Flat"]).unwrap();
        run(&mut engine, &["list", "add-member", "Bills", "Ann"]).unwrap();

        assert_eq!(
            run(&mut engine, &["group", "add-list", "Flat", "Bills"]).unwrap(),
            "already in the group"
        );
        assert!(run(&mut engine, &["group", "remove-member", "Flat", "Ann"]).is_err());
        assert_eq!(
            run(&mut engine, &["group", "remove-list", "Flat", "Bills"]).unwrap(),
            "removed"
        );
        assert_eq!(
            run(&mut engine, &["group", "remove-list", "Flat", "Bills"]).unwrap(),
            "not in the group"
        );
        assert_eq!(
            run(&mut engine, &["group", "remove-member", "Flat", "Ann"]).unwrap(),
            "removed"
        );
    }

    #[test]
    fn close_needs_a_target() {
        let mut engine = trip();
        assert!(run(&mut engine, &["list", "close", "Trip"]).is_err());
    }

    #[test]
    fn undo_reports_what_it_reverted() {
        let mut engine = trip();
        run(
            &mut engine,
            &["list", "add-expense", "Trip", "Taxi", "--payer", "Bob", "--amount", "12,00"],
        )
        .unwrap();
        assert_eq!(
            run(&mut engine, &["list", "undo", "Trip"]).unwrap(),
            "undone: add item Taxi (it0000)"
        );
        assert_eq!(
            run(&mut engine, &["list", "remove-item", "Trip", "it0000"]).unwrap(),
            "no such item"
        );
    }
}
