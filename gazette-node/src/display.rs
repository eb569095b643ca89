//! Console display sink: command output and news on stdout, lifecycle
//! events forwarded to the main task over a channel.

use gazette_core::DisplaySink;
use tokio::sync::mpsc;

#[derive(Debug)]
pub enum LifecycleEvent {
    LoginSucceeded,
    LoginFailed,
    Close { message: String, exit_code: i32 },
}

pub struct ConsoleDisplay {
    lifecycle: mpsc::UnboundedSender<LifecycleEvent>,
}

impl ConsoleDisplay {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<LifecycleEvent>) {
        let (lifecycle, rx) = mpsc::unbounded_channel();
        (Self { lifecycle }, rx)
    }

    fn send(&self, event: LifecycleEvent) {
        // The receiver only disappears during teardown.
        let _ = self.lifecycle.send(event);
    }
}

impl DisplaySink for ConsoleDisplay {
    fn log(&self, line: &str) {
        println!("* {line}");
    }

    fn command_result(&self, command: &str, result: &str) {
        println!("[{command}]\n{result}");
    }

    fn news(&self, text: &str) {
        println!("--- news {}", "-".repeat(40));
        println!("{text}");
        println!("{}", "-".repeat(49));
    }

    fn login_succeeded(&self) {
        self.send(LifecycleEvent::LoginSucceeded);
    }

    fn login_failed(&self) {
        self.send(LifecycleEvent::LoginFailed);
    }

    fn application_enabled(&self) {
        println!("* ready, type `help` for commands");
    }

    fn close_application(&self, message: &str, exit_code: i32) {
        self.send(LifecycleEvent::Close {
            message: message.to_string(),
            exit_code,
        });
    }
}
