use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use uuid::Uuid;

use crate::application::WalletService;
use crate::config::Config;
use crate::domain::{format_cents, parse_cents, AccountId, TransactionReceipt};

/// walletd - transactional wallet ledger
#[derive(Parser)]
#[command(name = "walletd")]
#[command(about = "A double-entry wallet ledger with idempotent operations")]
#[command(version)]
pub struct Cli {
    /// Database file path (overrides DB_URL from the environment)
    #[arg(short, long)]
    pub database: Option<String>,

    /// Emit machine-readable JSON instead of text
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the database and apply schema migrations
    Init,

    /// Open a new account
    Open {
        /// Account owner label
        owner: String,

        /// Currency code (e.g. EUR)
        #[arg(short, long, default_value = "EUR")]
        currency: String,

        /// Allow the balance to go negative
        #[arg(long)]
        overdraft: bool,
    },

    /// Close an account (history is kept, mutations are refused)
    Close {
        /// Account id
        account: String,
    },

    /// Deposit money into an account
    Deposit {
        /// Account id
        account: String,

        /// Amount (e.g. "50.00" or "50")
        amount: String,

        /// Idempotency key; generated when omitted
        #[arg(short, long)]
        key: Option<String>,
    },

    /// Withdraw money from an account
    Withdraw {
        /// Account id
        account: String,

        /// Amount (e.g. "50.00" or "50")
        amount: String,

        /// Idempotency key; generated when omitted
        #[arg(short, long)]
        key: Option<String>,
    },

    /// Transfer money between two accounts
    Transfer {
        /// Amount (e.g. "50.00" or "50")
        amount: String,

        /// Source account id
        #[arg(long)]
        from: String,

        /// Destination account id
        #[arg(long)]
        to: String,

        /// Idempotency key; generated when omitted
        #[arg(short, long)]
        key: Option<String>,
    },

    /// Show the balance of an account
    Balance {
        /// Account id
        account: String,
    },

    /// List accounts
    Accounts {
        /// Include closed accounts
        #[arg(long)]
        all: bool,
    },

    /// List committed ledger entries for an account
    Entries {
        /// Account id
        account: String,
    },

    /// Reconcile cached balances against the committed ledger
    Audit,
}

impl Cli {
    pub async fn run(&self) -> Result<()> {
        let config = self.config()?;
        let service = WalletService::init(&config).await?;

        match &self.command {
            Commands::Init => {
                // Migrations already ran above; this just reports.
                println!("Database initialized at {}", config.db_url);
            }

            Commands::Open {
                owner,
                currency,
                overdraft,
            } => {
                let account = service
                    .open_account(owner.clone(), currency, Some(*overdraft))
                    .await?;
                if self.json {
                    println!("{}", serde_json::to_string_pretty(&account)?);
                } else {
                    println!("Opened account {} ({} {})", account.id, account.owner, account.currency);
                }
            }

            Commands::Close { account } => {
                let account = service.close_account(parse_account_id(account)?).await?;
                println!("Closed account {}", account.id);
            }

            Commands::Deposit {
                account,
                amount,
                key,
            } => {
                let account_id = parse_account_id(account)?;
                let receipt = service
                    .deposit(account_id, parse_amount(amount)?, resolve_key(key))
                    .await?;
                self.print_receipt(&receipt, account_id)?;
            }

            Commands::Withdraw {
                account,
                amount,
                key,
            } => {
                let account_id = parse_account_id(account)?;
                let receipt = service
                    .withdraw(account_id, parse_amount(amount)?, resolve_key(key))
                    .await?;
                self.print_receipt(&receipt, account_id)?;
            }

            Commands::Transfer {
                amount,
                from,
                to,
                key,
            } => {
                let from_id = parse_account_id(from)?;
                let to_id = parse_account_id(to)?;
                let receipt = service
                    .transfer(from_id, to_id, parse_amount(amount)?, resolve_key(key))
                    .await?;
                if self.json {
                    println!("{}", serde_json::to_string_pretty(&receipt)?);
                } else {
                    let tag = if receipt.replayed { " (replayed)" } else { "" };
                    println!("Transaction {}{}", receipt.transaction_id, tag);
                    for (account_id, balance) in &receipt.balances {
                        println!("  {}: {}", account_id, format_cents(*balance));
                    }
                }
            }

            Commands::Balance { account } => {
                let view = service.get_balance(parse_account_id(account)?).await?;
                if self.json {
                    println!("{}", serde_json::to_string_pretty(&view.account)?);
                } else {
                    println!(
                        "{} {} {}",
                        view.account.id,
                        format_cents(view.balance_cents),
                        view.account.currency
                    );
                }
            }

            Commands::Accounts { all } => {
                let accounts = service.list_accounts(*all).await?;
                if self.json {
                    println!("{}", serde_json::to_string_pretty(&accounts)?);
                } else {
                    for account in accounts {
                        let status = if account.is_closed() { "closed" } else { "open" };
                        println!(
                            "{}  {:<20} {} {} [{}] ({})",
                            account.id,
                            account.owner,
                            format_cents(account.balance_cents),
                            account.currency,
                            account.kind,
                            status
                        );
                    }
                }
            }

            Commands::Entries { account } => {
                let entries = service.list_entries(parse_account_id(account)?).await?;
                if self.json {
                    println!("{}", serde_json::to_string_pretty(&entries)?);
                } else {
                    for entry in entries {
                        println!(
                            "{}  {:>12}  balance {:>12}  tx {}",
                            entry.created_at.format("%Y-%m-%d %H:%M:%S"),
                            format_cents(entry.amount_cents),
                            format_cents(entry.balance_after_cents),
                            entry.transaction_id
                        );
                    }
                }
            }

            Commands::Audit => {
                let report = service.audit().await?;
                if self.json {
                    println!("{}", serde_json::to_string_pretty(&report)?);
                } else if report.is_clean() {
                    println!(
                        "OK: {} accounts, {} transactions, {} entries reconcile",
                        report.account_count, report.transaction_count, report.entry_count
                    );
                } else {
                    println!("{} finding(s):", report.findings.len());
                    for finding in &report.findings {
                        println!("  {:?}", finding);
                    }
                    std::process::exit(1);
                }
            }
        }

        Ok(())
    }

    fn config(&self) -> Result<Config> {
        match &self.database {
            Some(path) => Ok(Config::with_db_url(format!("sqlite:{}?mode=rwc", path))),
            None => Ok(Config::from_env()?),
        }
    }

    fn print_receipt(&self, receipt: &TransactionReceipt, account_id: AccountId) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(receipt)?);
        } else {
            let tag = if receipt.replayed { " (replayed)" } else { "" };
            let balance = receipt
                .balance_of(account_id)
                .map(format_cents)
                .unwrap_or_else(|| "?".to_string());
            println!(
                "Transaction {}{} - new balance {}",
                receipt.transaction_id, tag, balance
            );
        }
        Ok(())
    }
}

fn parse_account_id(input: &str) -> Result<AccountId> {
    Uuid::parse_str(input).with_context(|| format!("Invalid account id: {}", input))
}

fn parse_amount(input: &str) -> Result<i64> {
    parse_cents(input).with_context(|| format!("Invalid amount: {}", input))
}

fn resolve_key(key: &Option<String>) -> String {
    key.clone().unwrap_or_else(|| Uuid::new_v4().to_string())
}
