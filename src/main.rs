mod auth;
mod backup;
mod cli;
mod engine;
mod error;
mod fmt;
mod journal;
mod logging;
mod merge;
mod models;
mod remote;
mod settings;
mod stats;
mod store;

use clap::{CommandFactory, Parser};

use cli::trades::TradeFields;
use cli::{AccountCommands, Cli, Commands, TagCommands, TradeCommands};
use models::{AccountField, Taxonomy};

fn main() {
    let cli = Cli::parse();
    logging::init(logging::Verbosity::from_flags(cli.verbose, cli.quiet));

    let result = match cli.command {
        None | Some(Commands::Status) => cli::status::run(),
        Some(Commands::Init { data_dir, remote_dir }) => cli::init::run(data_dir, remote_dir),
        Some(Commands::Login {
            user,
            name,
            email,
            guest,
        }) => cli::login::login(&user, name, email, guest),
        Some(Commands::Logout) => cli::login::logout(),
        Some(Commands::Trade { command }) => match command {
            TradeCommands::Add {
                amount,
                date,
                note,
                strategy,
                label,
                account,
            } => cli::trades::add(TradeFields {
                amount: Some(amount),
                date,
                note,
                strategy,
                label,
                account,
            }),
            TradeCommands::Edit {
                id,
                amount,
                date,
                note,
                strategy,
                label,
                account,
            } => cli::trades::edit(
                &id,
                TradeFields {
                    amount,
                    date,
                    note,
                    strategy,
                    label,
                    account,
                },
            ),
            TradeCommands::Delete { id } => cli::trades::delete(&id),
            TradeCommands::List { limit } => cli::trades::list(limit),
        },
        Some(Commands::Strategy { command }) => run_tags(Taxonomy::Strategies, command),
        Some(Commands::Label { command }) => run_tags(Taxonomy::Labels, command),
        Some(Commands::Account { command }) => match command {
            AccountCommands::List => cli::accounts::list(),
            AccountCommands::Add { id, name, capital } => cli::accounts::add(&id, &name, capital),
            AccountCommands::Set {
                id,
                name,
                capital,
                profit_color,
                loss_color,
            } => {
                let fields = [
                    name.map(AccountField::Name),
                    capital.map(AccountField::InitialCapital),
                    profit_color.map(AccountField::ProfitColor),
                    loss_color.map(AccountField::LossColor),
                ]
                .into_iter()
                .flatten()
                .collect();
                cli::accounts::set(&id, fields)
            }
            AccountCommands::Remove { id } => cli::accounts::remove(&id),
            AccountCommands::Select { ids } => cli::accounts::select(ids),
        },
        Some(Commands::Color { value }) => cli::accounts::set_loss_color(&value),
        Some(Commands::Import { file, resolve }) => cli::import::run(&file, resolve),
        Some(Commands::Export { output }) => cli::export::run(output),
        Some(Commands::Sync) => cli::sync::push(),
        Some(Commands::Pull) => cli::sync::pull(),
        Some(Commands::Resolve { choice }) => cli::sync::resolve(choice),
        Some(Commands::Reset { yes }) => cli::reset::run(yes),
        Some(Commands::Completions { shell }) => {
            clap_complete::generate(shell, &mut Cli::command(), "tradelog", &mut std::io::stdout());
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn run_tags(which: Taxonomy, command: TagCommands) -> error::Result<()> {
    match command {
        TagCommands::Add { name } => cli::tags::add(which, &name),
        TagCommands::Remove { name } => cli::tags::remove(which, &name),
        TagCommands::List => cli::tags::list(which),
    }
}
