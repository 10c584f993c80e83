//! Example session: ask the peer for its peer table and client list, send an echo, report.

use std::time::{Duration, Instant};

use teol0_core::{
    echo_message, round_trip_ms, ClientsAnswer, Event, EventSink, Outbox, Packet, PeersAnswer,
    SystemCommand,
};

const RULE: &str = "-----------------------------------------------------";

/// How long a one-shot run waits for the echo answer.
const ANSWER_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Driver {
    peer_name: String,
    message: String,
    repeat: bool,
    echo_interval: Duration,
    started: Instant,
    last_echo: Option<Instant>,
    outcome: Option<bool>,
}

impl Driver {
    pub fn new(peer_name: String, message: String, repeat: bool, echo_interval: Duration) -> Self {
        Self {
            peer_name,
            message,
            repeat,
            echo_interval,
            started: Instant::now(),
            last_echo: None,
            outcome: None,
        }
    }

    /// `Some(true)` once an echo came back intact, `Some(false)` on mismatch or timeout.
    pub fn outcome(&self) -> Option<bool> {
        self.outcome
    }

    fn request(&self, out: &mut Outbox<'_>, cmd: SystemCommand) {
        match out.send(cmd.code(), &self.peer_name, &[]) {
            Ok(n) => println!(
                "Send {n} bytes packet to L0 server to peer {}, cmd = {} ({cmd})",
                self.peer_name,
                cmd.code()
            ),
            Err(e) => println!("Can't send {cmd}: {e}"),
        }
    }

    fn echo(&mut self, out: &mut Outbox<'_>) {
        match out.send_echo(&self.peer_name, self.message.as_bytes()) {
            Ok(n) => println!(
                "Send {n} bytes packet to L0 server to peer {}, cmd = {} ({}), data: {}",
                self.peer_name,
                SystemCommand::Echo.code(),
                SystemCommand::Echo,
                self.message
            ),
            Err(e) => println!("Can't send echo: {e}"),
        }
        self.last_echo = Some(Instant::now());
    }

    fn finish(&mut self, out: &mut Outbox<'_>, ok: bool) {
        if self.outcome.is_none() || !ok {
            self.outcome = Some(ok);
        }
        if !self.repeat {
            println!("\nTest result: {}", if ok { "OK" } else { "ERROR" });
            out.close();
        }
    }

    fn on_packet(&mut self, out: &mut Outbox<'_>, packet: &Packet<'_>) {
        println!(
            "Receive {} bytes: {} bytes data from L0 server, from peer {}, cmd = {}",
            packet.frame_len(),
            packet.payload().len(),
            packet.peer_name(),
            packet.command()
        );
        match SystemCommand::try_from(packet.command()) {
            Ok(SystemCommand::PeersAnswer) => match PeersAnswer::parse(packet.payload()) {
                Ok(answer) => {
                    println!("{RULE}\nPeers ({}): \n{RULE}", answer.peers.len());
                    for peer in &answer.peers {
                        println!("{peer}");
                    }
                    println!("{RULE}\n");
                }
                Err(e) => println!("Bad peers answer: {e}"),
            },
            Ok(SystemCommand::ClientsAnswer) => match ClientsAnswer::parse(packet.payload()) {
                Ok(answer) => {
                    println!("{RULE}\nClients ({}): \n{RULE}", answer.clients.len());
                    for name in &answer.clients {
                        println!("{name:<12}");
                    }
                    println!("{RULE}\n");
                }
                Err(e) => println!("Bad clients answer: {e}"),
            },
            Ok(SystemCommand::EchoAnswer) => {
                let payload = packet.payload();
                let ok = match (echo_message(payload), round_trip_ms(payload)) {
                    (Ok(msg), Ok(ms)) => {
                        println!("data: {}", String::from_utf8_lossy(msg));
                        println!("Trip time: {ms:.3} ms");
                        msg == self.message.as_bytes()
                    }
                    (Err(e), _) | (_, Err(e)) => {
                        println!("Bad echo answer: {e}");
                        false
                    }
                };
                self.finish(out, ok);
            }
            _ => println!("data: {}", String::from_utf8_lossy(packet.payload())),
        }
    }

    fn on_tick(&mut self, out: &mut Outbox<'_>) {
        if self.repeat {
            let due = self
                .last_echo
                .map_or(true, |t| t.elapsed() >= self.echo_interval);
            if due {
                self.echo(out);
            }
        } else if self.outcome.is_none() && self.started.elapsed() > ANSWER_TIMEOUT {
            println!("Can't get answer from L0 server during timeout");
            self.finish(out, false);
        }
    }
}

impl EventSink for Driver {
    fn on_event(&mut self, out: &mut Outbox<'_>, event: Event<'_>) {
        match event {
            Event::Connected => {
                println!("Connected, login sent as {}\n", out.identity());
                self.started = Instant::now();
                self.request(out, SystemCommand::Peers);
                self.request(out, SystemCommand::Clients);
                println!();
                self.echo(out);
                println!();
            }
            Event::Received(packet) => self.on_packet(out, &packet),
            Event::Tick => self.on_tick(out),
            Event::Disconnected => println!("Disconnected from L0 server"),
            Event::Idle => {}
        }
    }
}
