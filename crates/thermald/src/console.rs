//! A line-oriented stand-in for the real RPC/event-bus transport, which is
//! out of scope for this workspace: reads one command per line from stdin
//! and prints the resulting ack code, so `thermald` is operable from a
//! terminal without a SAL/DDS bus attached. Implements [`RpcSurface`], the
//! same interface a real transport adapter would.

use crossbeam_channel::{Receiver, Sender};
use log::warn;
use std::io::BufRead;
use ts_rpc::{CommandKind, PendingRpcCommand, RpcParams, RpcSurface};

fn parse_line(line: &str) -> Option<(CommandKind, RpcParams)> {
    let mut parts = line.split_whitespace();
    let name = parts.next()?;
    let kind = CommandKind::from_name(name)?;
    let params = match kind {
        CommandKind::Start
        | CommandKind::Enable
        | CommandKind::Disable
        | CommandKind::Standby
        | CommandKind::ExitControl
        | CommandKind::CoolantPumpStart
        | CommandKind::CoolantPumpStop
        | CommandKind::CoolantPumpReset => RpcParams::None,
        CommandKind::SetLogLevel => RpcParams::LogLevel(parts.next()?.parse().ok()?),
        CommandKind::SetEngineeringMode => RpcParams::Bool(parts.next()?.parse().ok()?),
        CommandKind::CoolantPumpPower => RpcParams::Bool(parts.next()?.parse().ok()?),
        CommandKind::SetMixingValve => RpcParams::Float(parts.next()?.parse().ok()?),
        CommandKind::CoolantPumpFrequency => RpcParams::Float(parts.next()?.parse().ok()?),
        CommandKind::HeaterFanDemand => RpcParams::PwmRpm(vec![parts.next()?.parse().ok()?], Vec::new()),
        CommandKind::ApplySetpoint => RpcParams::TwoFloats(parts.next()?.parse().ok()?, parts.next()?.parse().ok()?),
    };
    Some((kind, params))
}

pub struct StdinRpcSurface {
    rx: Receiver<(CommandKind, RpcParams)>,
}

impl StdinRpcSurface {
    /// Spawn the stdin-reading thread and return a surface the external
    /// command adapter can poll. Unrecognised lines are logged and skipped
    /// rather than killing the console.
    pub fn spawn() -> Self {
        let (tx, rx): (Sender<(CommandKind, RpcParams)>, _) = crossbeam_channel::unbounded();
        std::thread::Builder::new()
            .name("stdin-console".to_string())
            .spawn(move || {
                let stdin = std::io::stdin();
                for line in stdin.lock().lines() {
                    let Ok(line) = line else { break };
                    let line = line.trim();
                    if line.is_empty() || line.starts_with('#') {
                        continue;
                    }
                    match parse_line(line) {
                        Some(request) => {
                            if tx.send(request).is_err() {
                                break;
                            }
                        }
                        None => warn!("console: unrecognised command {line:?}"),
                    }
                }
            })
            .expect("failed to spawn stdin console thread");
        Self { rx }
    }
}

impl RpcSurface for StdinRpcSurface {
    fn poll(&mut self) -> Option<PendingRpcCommand> {
        let (kind, params) = self.rx.try_recv().ok()?;
        Some(PendingRpcCommand {
            kind,
            params,
            ack: Box::new(move |code| println!("ack {code}")),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands_with_and_without_parameters() {
        assert!(matches!(parse_line("start"), Some((CommandKind::Start, RpcParams::None))));
        assert!(matches!(
            parse_line("setMixingValve 42.5"),
            Some((CommandKind::SetMixingValve, RpcParams::Float(v))) if v == 42.5
        ));
        assert!(matches!(
            parse_line("applySetpoint 5.0 12.0"),
            Some((CommandKind::ApplySetpoint, RpcParams::TwoFloats(g, h))) if g == 5.0 && h == 12.0
        ));
    }

    #[test]
    fn unknown_command_name_is_none() {
        assert!(parse_line("doSomethingWeird").is_none());
    }

    #[test]
    fn malformed_parameter_is_none() {
        assert!(parse_line("setMixingValve not-a-number").is_none());
    }
}
