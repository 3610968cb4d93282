use std::io::Write;

use alloy_primitives::{Address, B256};
use ena::{Confirmation, ConnectionState, PendingTransaction, Session};
use serde::Serialize;
use serde_json::json;

use crate::error::AppError;

/// Everything `status` and `balance` print.
#[derive(Debug, Default, Serialize)]
pub struct StatusReport {
    pub account: Option<Address>,
    pub chain_id: Option<u64>,
    pub connected: bool,
    pub ready: bool,
    pub network: String,
    pub required_chain_id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_balance: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub staked_balance: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_reward: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_allowance: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collection_approved: Option<bool>,
}

pub fn write_session<W: Write>(session: &Session, json_mode: bool, writer: &mut W) -> Result<(), AppError> {
    if json_mode {
        writeln!(writer, "{}", serde_json::to_string(session)?)?;
        return Ok(());
    }
    match (session.account, session.chain_id) {
        (Some(account), Some(chain_id)) => writeln!(writer, "connected\t{account}\tchain {chain_id}")?,
        _ => writeln!(writer, "disconnected")?,
    }
    Ok(())
}

pub fn write_status<W: Write>(report: &StatusReport, json_mode: bool, writer: &mut W) -> Result<(), AppError> {
    if json_mode {
        writeln!(writer, "{}", serde_json::to_string(report)?)?;
        return Ok(());
    }

    let account = report
        .account
        .map_or_else(|| "-".to_string(), |a| a.to_string());
    let chain = report
        .chain_id
        .map_or_else(|| "-".to_string(), |c| c.to_string());
    writeln!(writer, "account\t{account}")?;
    writeln!(writer, "chain\t{chain}")?;
    writeln!(
        writer,
        "network\t{} ({}){}",
        report.network,
        report.required_chain_id,
        if report.ready { "" } else { " [not ready]" }
    )?;

    let rows = [
        ("token balance", report.token_balance.as_deref()),
        ("staked", report.staked_balance.as_deref()),
        ("pending reward", report.pending_reward.as_deref()),
        ("token allowance", report.token_allowance.as_deref()),
    ];
    for (label, value) in rows {
        if let Some(value) = value {
            writeln!(writer, "{label}\t{value}")?;
        }
    }
    if let Some(approved) = report.collection_approved {
        writeln!(writer, "collection approved\t{approved}")?;
    }
    Ok(())
}

pub fn write_submitted<W: Write>(
    pending: &PendingTransaction,
    explorer_url: &str,
    json_mode: bool,
    writer: &mut W,
) -> Result<(), AppError> {
    if json_mode {
        let value = json!({
            "event": "submitted",
            "transaction": pending,
            "explorer": explorer_url,
        });
        writeln!(writer, "{value}")?;
    } else {
        writeln!(writer, "submitted\t{}\t{}\t{explorer_url}", pending.intent, pending.hash)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_confirmation<W: Write>(
    confirmation: &Confirmation,
    json_mode: bool,
    writer: &mut W,
) -> Result<(), AppError> {
    if json_mode {
        let value = json!({
            "event": "confirmed",
            "confirmation": confirmation,
        });
        writeln!(writer, "{value}")?;
    } else {
        let block = confirmation
            .block_number
            .map_or_else(|| "-".to_string(), |b| b.to_string());
        writeln!(
            writer,
            "confirmed\t{}\t{}\tblock {block}",
            confirmation.intent, confirmation.hash
        )?;
    }
    writer.flush()?;
    Ok(())
}

/// One line per connection state change (`watch`).
pub fn write_state<W: Write>(state: &ConnectionState, json_mode: bool, writer: &mut W) -> Result<(), AppError> {
    if json_mode {
        let value = json!({
            "state": state_name(state),
            "account": state.account(),
            "chain_id": state.chain_id(),
        });
        writeln!(writer, "{value}")?;
    } else {
        match state.account() {
            Some(account) => writeln!(writer, "{state}\t{account}")?,
            None => writeln!(writer, "{state}")?,
        }
    }
    writer.flush()?;
    Ok(())
}

/// Hash plus explorer link for a transaction still in flight.
pub fn pending_hint(hash: &B256, explorer_url: &str) -> String {
    format!("transaction {hash} is still pending, see {explorer_url}")
}

fn state_name(state: &ConnectionState) -> &'static str {
    match state {
        ConnectionState::Disconnected => "disconnected",
        ConnectionState::Connecting => "connecting",
        ConnectionState::WrongNetwork { .. } => "wrong_network",
        ConnectionState::Ready { .. } => "ready",
    }
}
