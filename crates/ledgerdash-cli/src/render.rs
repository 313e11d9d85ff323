//! Plain-text rendering of query state.

use std::fmt::Write;

use ledgerdash_core::api::ApiError;
use ledgerdash_core::models::{
    net_balance, portfolio_value_cents, Account, Card, CryptoHolding, Loan, Transaction,
};
use ledgerdash_core::query::{QueryError, QueryState};
use ledgerdash_core::utils::{
    format_cents, format_date, format_percent, format_signed_cents, format_timestamp,
    truncate_string,
};

/// Width of name columns
const NAME_WIDTH: usize = 24;

/// One-line description of a failed query, with a hint when retrying later
/// could help.
pub fn describe_error(err: &QueryError) -> String {
    let transient = err
        .cause()
        .and_then(|cause| cause.chain().find_map(|e| e.downcast_ref::<ApiError>()))
        .is_some_and(ApiError::is_transient);
    if transient {
        format!("{} (temporary, try again shortly)", err)
    } else {
        err.to_string()
    }
}

/// Render the body of a panel, or why it has none.
fn panel<T>(
    out: &mut String,
    title: &str,
    state: &QueryState<T>,
    body: impl FnOnce(&mut String, &T),
) {
    let _ = writeln!(out, "== {} ==", title);
    match (&state.data, &state.error) {
        (Some(data), error) => {
            body(out, data);
            if let Some(err) = error {
                let _ = writeln!(out, "  (showing last known data: {})", describe_error(err));
            }
        }
        (None, Some(err)) => {
            let _ = writeln!(out, "  unavailable: {}", describe_error(err));
        }
        (None, None) => {
            let _ = writeln!(out, "  no data");
        }
    }
    out.push('\n');
}

pub fn accounts(out: &mut String, state: &QueryState<Vec<Account>>) {
    panel(out, "Accounts", state, |out, accounts| {
        for account in accounts {
            let _ = writeln!(
                out,
                "  {:<width$} {:<9} {:>16}  ({} available)",
                truncate_string(&account.name, NAME_WIDTH),
                account.kind.label(),
                format_cents(account.balance_cents),
                format_cents(account.available()),
                width = NAME_WIDTH,
            );
        }
        let _ = writeln!(out, "  Net balance: {}", format_cents(net_balance(accounts)));
    });
}

pub fn cards(out: &mut String, state: &QueryState<Vec<Card>>) {
    panel(out, "Cards", state, |out, cards| {
        for card in cards {
            let _ = writeln!(
                out,
                "  {:<width$} {}  {}  [{}]",
                truncate_string(&card.display_name(), NAME_WIDTH),
                card.masked_number(),
                card.id,
                card.status.label(),
                width = NAME_WIDTH,
            );
        }
    });
}

pub fn loans(out: &mut String, state: &QueryState<Vec<Loan>>) {
    panel(out, "Loans", state, |out, loans| {
        for loan in loans {
            let due = loan
                .next_payment_due
                .map(|d| format!(", next due {}", format_date(d)))
                .unwrap_or_default();
            let _ = writeln!(
                out,
                "  {:<width$} {:>16} owed at {}  {} repaid{}",
                truncate_string(&loan.name, NAME_WIDTH),
                format_cents(loan.balance_cents),
                loan.apr_display(),
                format_percent(loan.progress_percent()),
                due,
                width = NAME_WIDTH,
            );
        }
    });
}

pub fn crypto(out: &mut String, state: &QueryState<Vec<CryptoHolding>>) {
    panel(out, "Crypto", state, |out, holdings| {
        for holding in holdings {
            let gain = holding
                .gain_cents()
                .map(|g| format!("  ({})", format_signed_cents(g)))
                .unwrap_or_default();
            let _ = writeln!(
                out,
                "  {:<6} {:>14.6} {:>16}{}",
                holding.symbol,
                holding.quantity,
                format_cents(holding.market_value_cents()),
                gain,
            );
        }
        let _ = writeln!(
            out,
            "  Portfolio value: {}",
            format_cents(portfolio_value_cents(holdings))
        );
    });
}

pub fn transactions(out: &mut String, account_id: &str, state: &QueryState<Vec<Transaction>>) {
    panel(out, &format!("Transactions for {}", account_id), state, |out, txs| {
        for tx in txs {
            let _ = writeln!(
                out,
                "  {}  {:<width$} {:>14}{}",
                format_timestamp(tx.posted_at),
                truncate_string(&tx.description, NAME_WIDTH * 2),
                format_signed_cents(tx.amount_cents),
                if tx.pending { "  pending" } else { "" },
                width = NAME_WIDTH * 2,
            );
        }
    });
}
