//! Operator console: command parsing and event rendering.

use std::path::PathBuf;

use crate::{
    availability::Availability,
    completion::{CompletionSnapshot, CompletionStage},
    error::Remedy,
    models::{Order, OrderId},
    worker::{WorkerCmd, WorkerEvent},
};

/// Command summary printed by `help`.
pub const HELP: &str = "\
commands:
  login <phone> <otp>    sign in
  logout                 sign out
  online | offline       toggle availability
  orders                 refresh available and current orders
  accept <id>            accept an available order
  advance [notes]        move the current order one step
  complete               start delivery completion
  photo <path>           attach proof-of-delivery photo
  send-otp | resend-otp  send the customer OTP
  verify <otp> [note]    verify OTP and finish the delivery
  abandon                leave delivery completion
  stats                  delivery counts
  help | quit";

/// One parsed console line.
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Empty,
    Help,
    Quit,
    Command(WorkerCmd),
}

/// Rest of the line after the first word, if any.
fn tail(line: &str, head: &str) -> Option<String> {
    let rest = line[head.len()..].trim();
    (!rest.is_empty()).then(|| rest.to_string())
}

/// Parse one operator line; `Err` carries a usage hint.
pub fn parse_line(line: &str) -> Result<Input, String> {
    let line = line.trim();
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        return Ok(Input::Empty);
    };

    let cmd = match head {
        "help" | "?" => return Ok(Input::Help),
        "quit" | "exit" => return Ok(Input::Quit),
        "login" => match (words.next(), words.next()) {
            (Some(phone), Some(otp)) => WorkerCmd::Login {
                phone: phone.into(),
                otp: otp.into(),
            },
            _ => return Err("usage: login <phone> <otp>".into()),
        },
        "logout" => WorkerCmd::Logout,
        "online" => WorkerCmd::GoOnline,
        "offline" => WorkerCmd::GoOffline,
        "orders" => WorkerCmd::RefreshOrders,
        "accept" => match words.next() {
            Some(id) => WorkerCmd::Accept(OrderId::new(id)),
            None => return Err("usage: accept <id>".into()),
        },
        "advance" => WorkerCmd::Advance {
            notes: tail(line, head),
        },
        "complete" => WorkerCmd::OpenCompletion,
        "photo" => match tail(line, head) {
            Some(path) => WorkerCmd::CapturePhoto(PathBuf::from(path)),
            None => return Err("usage: photo <path>".into()),
        },
        "send-otp" => WorkerCmd::SendOtp,
        "resend-otp" => WorkerCmd::ResendOtp,
        "verify" => match words.next() {
            Some(otp) => {
                let note = words.collect::<Vec<_>>().join(" ");
                WorkerCmd::Verify {
                    otp: otp.into(),
                    note,
                }
            }
            None => return Err("usage: verify <otp> [note]".into()),
        },
        "abandon" => WorkerCmd::AbandonCompletion,
        "stats" => WorkerCmd::LoadStats,
        other => return Err(format!("unknown command: {other} (try `help`)")),
    };
    Ok(Input::Command(cmd))
}

fn order_line(o: &Order) -> String {
    let mut s = format!("#{} [{}]", o.id, o.status.label());
    if let Some(c) = &o.customer {
        s.push_str(&format!(" to {} ({})", c.name, c.address));
    }
    if let Some(gas) = &o.gas_type {
        s.push_str(&format!(" {gas}"));
        if let Some(q) = o.quantity {
            s.push_str(&format!(" x{q}"));
        }
    }
    if let Some(fee) = o.delivery_fee {
        s.push_str(&format!(" fee {fee:.2}"));
    }
    s
}

fn completion_line(c: &CompletionSnapshot) -> String {
    let stage = match c.stage {
        CompletionStage::CapturingProof => "take a proof photo".to_string(),
        CompletionStage::AwaitingOtpSend => "photo attached, send the OTP".to_string(),
        CompletionStage::OtpPending if c.cooldown > 0 => {
            format!("enter the customer's OTP (resend in {})", c.cooldown)
        }
        CompletionStage::OtpPending => "enter the customer's OTP (resend available)".to_string(),
        CompletionStage::Verifying => "verifying".to_string(),
        CompletionStage::Completed => "delivered".to_string(),
    };
    match &c.failure {
        Some(f) => format!("order #{}: {stage} (last attempt failed: {f})", c.order_id),
        None => format!("order #{}: {stage}", c.order_id),
    }
}

fn remedy_hint(remedy: Remedy) -> &'static str {
    match remedy {
        Remedy::Retry => "try again",
        Remedy::FixInput => "check your input",
        Remedy::OpenSettings => "check device settings",
        Remedy::SignIn => "sign in with `login`",
    }
}

/// Text shown to the operator for a worker event.
pub fn render(ev: &WorkerEvent) -> String {
    match ev {
        WorkerEvent::SignedIn(p) => format!("signed in as {} ({})", p.user.name, p.user.phone),
        WorkerEvent::SignedOut => "signed out".into(),
        WorkerEvent::Availability(a) => match a {
            Availability::Online => "you are online".into(),
            Availability::Offline => "you are offline".into(),
            Availability::Updating => "updating availability...".into(),
        },
        WorkerEvent::AvailableOrders(orders) if orders.is_empty() => "no available orders".into(),
        WorkerEvent::AvailableOrders(orders) => {
            let lines: Vec<String> = orders.iter().map(|o| format!("  {}", order_line(o))).collect();
            format!("available orders:\n{}", lines.join("\n"))
        }
        WorkerEvent::CurrentOrder(Some(o)) => format!("current: {}", order_line(o)),
        WorkerEvent::CurrentOrder(None) => "no current order".into(),
        WorkerEvent::Completion(c) => completion_line(c),
        WorkerEvent::Stats { stats, history } => format!(
            "pending {} / active {} / delivered {} / cancelled {} ({} finished this session)",
            stats.pending, stats.active, stats.delivered, stats.cancelled, history
        ),
        WorkerEvent::Log(m) => m.clone(),
        WorkerEvent::Error { message, remedy } => {
            format!("error: {message} ({})", remedy_hint(*remedy))
        }
    }
}
