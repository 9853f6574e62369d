//! Console front end for a running scan.
//!
//! Prints [`ScanEvent`]s and feeds stdin lines back as commands: an SMS
//! code while verification is pending, `stop` otherwise.

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::info;

use qrgate_core::error::QrGateError;
use qrgate_core::scan::{ScanEvent, ScanHandle, ScanPhase};
use qrgate_core::ticket::ticket_of;

/// One line of console output for `event`.
pub fn render(event: &ScanEvent) -> String {
    match event {
        ScanEvent::QrDetected(payload) => format!("[qr] ticket …{}", ticket_of(payload)),
        ScanEvent::Log(msg) => format!("[..] {msg}"),
        ScanEvent::StatusChanged(phase) => format!("[>>] {phase}"),
        ScanEvent::Error(msg) => format!("[!!] {msg}"),
        ScanEvent::VerificationRequired { sms_sent: true } => {
            "[??] SMS code sent; type it and press Enter (empty line cancels)".into()
        }
        ScanEvent::VerificationRequired { sms_sent: false } => {
            "[??] verification needed but the SMS request failed; type a code or an empty line to cancel".into()
        }
        ScanEvent::LoginSucceeded => "[ok] login confirmed".into(),
    }
}

/// Drive the session until it stops. Returns `true` on login success.
pub async fn run(
    handle: ScanHandle,
    mut events: mpsc::UnboundedReceiver<ScanEvent>,
) -> Result<bool, QrGateError> {
    let (line_tx, mut lines) = mpsc::channel::<String>(8);
    tokio::spawn(async move {
        let mut stdin = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = stdin.next_line().await {
            if line_tx.send(line).await.is_err() {
                break;
            }
        }
    });

    let mut awaiting_code = false;
    let mut succeeded = false;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C received; stopping");
                handle.stop().await?;
                break;
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                println!("{}", render(&event));
                match event {
                    ScanEvent::VerificationRequired { .. } => awaiting_code = true,
                    ScanEvent::LoginSucceeded => succeeded = true,
                    ScanEvent::StatusChanged(ScanPhase::Stopped) => break,
                    ScanEvent::StatusChanged(_) => awaiting_code = false,
                    _ => {}
                }
            }
            Some(line) = lines.recv() => {
                let line = line.trim();
                if awaiting_code {
                    awaiting_code = false;
                    if line.is_empty() {
                        handle.cancel_verification().await?;
                    } else {
                        handle.submit_code(line).await?;
                    }
                } else if matches!(line, "stop" | "q" | "quit") {
                    handle.stop().await?;
                }
            }
        }
    }
    Ok(succeeded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detected_payload_shows_only_the_ticket() {
        let line = render(&ScanEvent::QrDetected(
            "https://x.invalid/?G152#KURO=abcdefghijklmnopqrstuvwx".into(),
        ));
        assert!(line.ends_with("abcdefghijklmnopqrstuvwx"));
        assert!(!line.contains("https"));
    }

    #[test]
    fn verification_prompt_reflects_sms_result() {
        assert!(render(&ScanEvent::VerificationRequired { sms_sent: true }).contains("SMS code sent"));
        assert!(render(&ScanEvent::VerificationRequired { sms_sent: false }).contains("failed"));
        assert_eq!(
            render(&ScanEvent::StatusChanged(ScanPhase::Scanning)),
            "[>>] Scanning"
        );
    }
}
