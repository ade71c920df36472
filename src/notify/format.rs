//! HTML message rendering (Telegram parse mode).

use super::{PortfolioSnapshot, SummaryReport, TradeNotification};
use crate::portfolio::{blend_breakdown, pnl_percent, unrealized_pnl, Slice};

const NOT_AVAILABLE: &str = "n/a";

/// Money with thousands separators: 20588.2353 -> "20,588.24"
pub fn format_money(amount: f64, decimals: usize) -> String {
    let formatted = format!("{:.*}", decimals, amount.abs());
    let (int_part, frac_part) = match formatted.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (formatted.as_str(), None),
    };

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    let sign = if amount < 0.0 && formatted.chars().any(|c| c.is_ascii_digit() && c != '0') {
        "-"
    } else {
        ""
    };

    match frac_part {
        Some(frac) => format!("{}{}.{}", sign, grouped, frac),
        None => format!("{}{}", sign, grouped),
    }
}

pub fn format_units(units: f64) -> String {
    format!("{:.8}", units)
}

pub fn format_percent(value: f64) -> String {
    format!("{:.2}%", value)
}

fn price_or_na(price: Option<f64>) -> String {
    price
        .map(|p| format!("${}", format_money(p, 2)))
        .unwrap_or_else(|| NOT_AVAILABLE.to_string())
}

fn pnl_line(label: &str, slice_pnl: f64, percent: f64) -> String {
    format!(
        "• {}: <code>${}</code> ({})\n",
        label,
        format_money(slice_pnl, 2),
        format_percent(percent)
    )
}

fn slice_percent(slice: &Slice, price: f64) -> f64 {
    if slice.avg_price <= 0.0 {
        return 0.0;
    }
    (price / slice.avg_price - 1.0) * 100.0
}

/// Balance, runway and next purchase lines shared by every status message
fn balance_section(snapshot: &PortfolioSnapshot) -> String {
    let mut out = String::from("\n<b>Balance:</b>\n");

    match snapshot.balance {
        Some(balance) => {
            out.push_str(&format!(
                "• Quote Remaining: <code>${}</code>\n",
                format_money(balance.quote_free, 2)
            ));
        }
        None => {
            out.push_str(&format!("• Quote Remaining: <code>{}</code>\n", NOT_AVAILABLE));
        }
    }

    if let Some(runway) = snapshot.runway {
        out.push_str(&format!(
            "• Purchases Left: <code>{}</code> (${} per {})\n",
            runway.periods,
            format_money(snapshot.amount_usd, 2),
            snapshot.cadence.unit_name()
        ));
        out.push_str(&format!("• Days Left: <code>{}</code>\n", runway.days));
        let end_date = runway
            .ends_at(snapshot.taken_at, &snapshot.cadence)
            .map(|end| end.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| NOT_AVAILABLE.to_string());
        out.push_str(&format!("• Estimated End Date: <code>{}</code>\n", end_date));
    }

    out.push_str(&format!("• Next Purchase In: <code>{}</code>\n", snapshot.next_purchase));
    out
}

pub fn trade_message(notification: &TradeNotification) -> String {
    let trade = &notification.trade;
    let snapshot = &notification.snapshot;
    let stats = &snapshot.stats;

    let mut msg = String::new();
    let title = if trade.dry_run {
        "🧪 Simulated Purchase (dry run)"
    } else {
        "🎉 New Purchase Completed!"
    };
    msg.push_str(&format!("<b>{}</b>\n\n", title));

    msg.push_str("<b>Trade Details:</b>\n");
    msg.push_str(&format!("• Amount: <code>${}</code>\n", format_money(trade.usd_amount, 2)));
    msg.push_str(&format!("• Units Received: <code>{}</code>\n", format_units(trade.unit_amount)));
    msg.push_str(&format!("• Price: <code>${}</code>\n", format_money(trade.price, 2)));
    msg.push_str(&format!("• Order: <code>{}</code>\n", trade.order_id));

    msg.push_str("\n<b>Portfolio Summary:</b>\n");
    msg.push_str(&format!(
        "• Total Invested: <code>${}</code>\n",
        format_money(stats.total_spent_usd, 2)
    ));
    if snapshot.initial.is_empty() {
        msg.push_str(&format!("• Total Units: <code>{}</code>\n", format_units(stats.total_units)));
    } else {
        let breakdown = blend_breakdown(stats, &snapshot.initial);
        msg.push_str(&format!(
            "• DCA Units: <code>{}</code> (+ initial {})\n",
            format_units(breakdown.accumulated.units),
            format_units(breakdown.initial.units)
        ));
    }
    msg.push_str(&format!("• Average Price: <code>${}</code>\n", format_money(stats.mean_price, 2)));
    msg.push_str(&format!("• Current Price: <code>{}</code>\n", price_or_na(snapshot.price)));
    msg.push_str(&format!("• Total Trades: <code>{}</code>\n", stats.num_trades));

    if let Some(price) = snapshot.price {
        msg.push_str("\n<b>Performance:</b>\n");
        msg.push_str(&pnl_line(
            "PnL",
            unrealized_pnl(stats, price),
            pnl_percent(stats, price),
        ));
    }

    msg.push_str(&balance_section(snapshot));
    msg
}

pub fn insufficient_balance_message(balance: f64, required: f64) -> String {
    format!(
        "<b>⚠️ Insufficient Balance</b>\n\n\
        Purchase skipped.\n\
        • Available: <code>${}</code>\n\
        • Required: <code>${}</code>\n\n\
        Top up the account to resume purchases.",
        format_money(balance, 2),
        format_money(required, 2)
    )
}

/// Full portfolio statistics (/stats and /start)
pub fn stats_message(snapshot: &PortfolioSnapshot) -> String {
    let stats = &snapshot.stats;
    if stats.is_empty() {
        return "<b>No trades yet.</b> Start your DCA journey!".to_string();
    }

    let mut msg = String::from("<b>📊 Your Portfolio Statistics</b>\n\n<b>Overall Summary:</b>\n");
    msg.push_str(&format!(
        "• Total Investment: <code>${}</code>\n",
        format_money(stats.total_spent_usd, 2)
    ));
    msg.push_str(&format!("• Total Units: <code>{}</code>\n", format_units(stats.total_units)));
    msg.push_str(&format!("• Average Price: <code>${}</code>\n", format_money(stats.mean_price, 2)));
    msg.push_str(&format!("• Current Price: <code>{}</code>\n", price_or_na(snapshot.price)));

    if let Some(price) = snapshot.price {
        msg.push_str(&format!(
            "• Current Value: <code>${}</code>\n",
            format_money(stats.current_value(price), 2)
        ));
        msg.push_str(&pnl_line(
            "Total PnL",
            unrealized_pnl(stats, price),
            pnl_percent(stats, price),
        ));
    }

    let breakdown = blend_breakdown(stats, &snapshot.initial);

    if !snapshot.initial.is_empty() {
        let initial = &breakdown.initial;
        msg.push_str("\n<b>Initial Portfolio:</b>\n");
        msg.push_str(&format!("• Units: <code>{}</code>\n", format_units(initial.units)));
        msg.push_str(&format!("• Average Price: <code>${}</code>\n", format_money(initial.avg_price, 2)));
        msg.push_str(&format!(
            "• Initial Investment: <code>${}</code>\n",
            format_money(initial.spent_usd, 2)
        ));
        if let Some(price) = snapshot.price {
            msg.push_str(&pnl_line(
                "PnL",
                initial.unrealized_pnl(price),
                slice_percent(initial, price),
            ));
        }
    }

    if stats.num_trades > 0 {
        let accumulated = &breakdown.accumulated;
        msg.push_str("\n<b>DCA Strategy:</b>\n");
        msg.push_str(&format!("• Invested: <code>${}</code>\n", format_money(accumulated.spent_usd, 2)));
        msg.push_str(&format!("• Units Accumulated: <code>{}</code>\n", format_units(accumulated.units)));
        msg.push_str(&format!(
            "• Average Price: <code>${}</code>\n",
            format_money(accumulated.avg_price, 2)
        ));
        if let Some(price) = snapshot.price {
            msg.push_str(&pnl_line(
                "PnL",
                accumulated.unrealized_pnl(price),
                slice_percent(accumulated, price),
            ));
        }

        if let (Some(first), Some(last)) = (stats.first_trade_at, stats.last_trade_at) {
            let days_since_start = (snapshot.taken_at - first).num_days();
            let weeks = (days_since_start as f64 / 7.0).max(1.0);

            msg.push_str("\n<b>Trading Activity:</b>\n");
            msg.push_str(&format!("• First Trade: <code>{}</code>\n", first.format("%Y-%m-%d")));
            msg.push_str(&format!("• Latest Trade: <code>{}</code>\n", last.format("%Y-%m-%d")));
            msg.push_str(&format!("• Total Trades: <code>{}</code>\n", stats.num_trades));
            msg.push_str(&format!(
                "• Average Frequency: <code>{:.1}</code> trades/week\n",
                stats.num_trades as f64 / weeks
            ));
        }
    }

    msg.push_str(&balance_section(snapshot));
    msg
}

/// Account balances (/balance)
pub fn balance_message(snapshot: &PortfolioSnapshot) -> String {
    let mut msg = String::from("<b>💰 Account Balance</b>\n\n");
    match snapshot.balance {
        Some(balance) => {
            msg.push_str(&format!("• Base: <code>{}</code>\n", format_units(balance.base_free)));
            msg.push_str(&format!("• Quote: <code>${}</code>\n", format_money(balance.quote_free, 2)));
        }
        None => msg.push_str("Balance unavailable, the exchange could not be reached.\n"),
    }
    if let Some(runway) = snapshot.runway {
        msg.push_str(&format!(
            "• Days Left: <code>{}</code> (at ${} per {})\n",
            runway.days,
            format_money(snapshot.amount_usd, 2),
            snapshot.cadence.unit_name()
        ));
    }
    msg
}

pub fn summary_message(report: &SummaryReport) -> String {
    let snapshot = &report.snapshot;
    let stats = &snapshot.stats;

    let window_usd: f64 = report.trades.iter().map(|t| t.usd_amount).sum();
    let window_units: f64 = report.trades.iter().map(|t| t.unit_amount).sum();

    let mut msg = String::from("<b>🗓 Periodic Summary</b>\n\n");
    msg.push_str(&format!(
        "<b>Window:</b> <code>{}</code> to <code>{}</code> UTC\n\n",
        report.window_start.format("%Y-%m-%d %H:%M"),
        report.window_end.format("%Y-%m-%d %H:%M")
    ));

    msg.push_str("<b>This Period:</b>\n");
    msg.push_str(&format!("• Purchases: <code>{}</code>\n", report.trades.len()));
    msg.push_str(&format!("• Spent: <code>${}</code>\n", format_money(window_usd, 2)));
    msg.push_str(&format!("• Units Bought: <code>{}</code>\n", format_units(window_units)));
    if window_units > 0.0 {
        msg.push_str(&format!(
            "• Average Price: <code>${}</code>\n",
            format_money(window_usd / window_units, 2)
        ));
    }
    msg.push_str(&format!(
        "• Since Last Summary: <code>{}</code> trade(s)\n",
        report.since_last_report
    ));

    msg.push_str("\n<b>Portfolio:</b>\n");
    msg.push_str(&format!(
        "• Total Invested: <code>${}</code>\n",
        format_money(stats.total_spent_usd, 2)
    ));
    msg.push_str(&format!("• Total Units: <code>{}</code>\n", format_units(stats.total_units)));
    msg.push_str(&format!("• Average Price: <code>${}</code>\n", format_money(stats.mean_price, 2)));
    msg.push_str(&format!("• Current Price: <code>{}</code>\n", price_or_na(snapshot.price)));
    if let Some(price) = snapshot.price {
        msg.push_str(&pnl_line(
            "PnL",
            unrealized_pnl(stats, price),
            pnl_percent(stats, price),
        ));
    }

    msg.push_str(&balance_section(snapshot));
    msg
}

pub fn help_message() -> String {
    "Available commands:\n\
    /start - Show your DCA statistics\n\
    /stats - Show your DCA statistics\n\
    /balance - Show your account balance"
        .to_string()
}
