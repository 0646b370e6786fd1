use std::{
    io,
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        mpsc::{self, Receiver, Sender},
        Arc, Mutex,
    },
    thread,
};

use crate::client::{Argument, Message, Transport, DISPLAY_ID};

type Incoming = io::Result<Option<Message>>;

/// A client [`Transport`] whose events are fed by a [`ScriptedServer`]
#[derive(Debug)]
pub struct ScriptedTransport {
    incoming: Mutex<Receiver<Incoming>>,
    server: ScriptedServer,
}

/// The server side of a [`ScriptedTransport`]
///
/// `wl_display.sync` requests are answered right away unless disabled with
/// [`ScriptedServer::answer_sync`].
#[derive(Debug, Clone)]
pub struct ScriptedServer {
    events: Sender<Incoming>,
    sent: Arc<Mutex<Vec<Message>>>,
    reader_threads: Arc<Mutex<Vec<Option<String>>>>,
    answer_sync: Arc<AtomicBool>,
    after_sync: Arc<Mutex<Vec<Message>>>,
    fail_sends: Arc<AtomicBool>,
    callback_serial: Arc<AtomicU32>,
}

impl ScriptedTransport {
    pub fn new() -> (ScriptedTransport, ScriptedServer) {
        let (events, incoming) = mpsc::channel();
        let server = ScriptedServer {
            events,
            sent: Arc::default(),
            reader_threads: Arc::default(),
            answer_sync: Arc::new(AtomicBool::new(true)),
            after_sync: Arc::default(),
            fail_sends: Arc::default(),
            callback_serial: Arc::default(),
        };
        let transport = ScriptedTransport {
            incoming: Mutex::new(incoming),
            server: server.clone(),
        };
        (transport, server)
    }
}

impl Transport for ScriptedTransport {
    fn send(&self, message: Message) -> io::Result<()> {
        if self.server.fail_sends.load(Ordering::SeqCst) {
            return Err(io::ErrorKind::BrokenPipe.into());
        }
        let sync = message.sender_id == DISPLAY_ID && message.opcode == 0;
        let callback = message.new_ids().next();
        self.server.sent.lock().unwrap().push(message);
        match callback {
            Some(callback) if sync && self.server.answer_sync.load(Ordering::SeqCst) => {
                let serial = self.server.callback_serial.fetch_add(1, Ordering::SeqCst) + 1;
                self.server.event(callback, 0, [Argument::Uint(serial)]);
                self.server.event(DISPLAY_ID, 1, [Argument::Uint(callback)]);
                for message in self.server.after_sync.lock().unwrap().drain(..) {
                    let _ = self.server.events.send(Ok(Some(message)));
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn recv(&self) -> io::Result<Option<Message>> {
        {
            let mut threads = self.server.reader_threads.lock().unwrap();
            let name = thread::current().name().map(String::from);
            if !threads.contains(&name) {
                threads.push(name);
            }
        }
        // every sender gone is a hang-up too
        self.incoming.lock().unwrap().recv().unwrap_or(Ok(None))
    }
}

impl ScriptedServer {
    /// Send an event to the client
    pub fn event(&self, sender_id: u32, opcode: u16, args: impl IntoIterator<Item = Argument>) {
        let _ = self.events.send(Ok(Some(Message::new(sender_id, opcode, args))));
    }

    /// Hang up the connection
    pub fn hang_up(&self) {
        let _ = self.events.send(Ok(None));
    }

    /// Make the next read of the client fail
    pub fn fail_read(&self, kind: io::ErrorKind) {
        let _ = self.events.send(Err(kind.into()));
    }

    /// Make every following request of the client fail
    pub fn fail_sends(&self) {
        self.fail_sends.store(true, Ordering::SeqCst);
    }

    /// Whether `wl_display.sync` is answered automatically
    pub fn answer_sync(&self, answer: bool) {
        self.answer_sync.store(answer, Ordering::SeqCst);
    }

    /// Send an event right after the answer to the next `wl_display.sync`
    pub fn event_after_sync(&self, sender_id: u32, opcode: u16, args: impl IntoIterator<Item = Argument>) {
        self.after_sync
            .lock()
            .unwrap()
            .push(Message::new(sender_id, opcode, args));
    }

    /// The requests sent by the client so far
    pub fn sent(&self) -> Vec<Message> {
        self.sent.lock().unwrap().clone()
    }

    /// The requests sent by the client, except `wl_display.sync`
    pub fn requests(&self) -> Vec<Message> {
        self.sent()
            .into_iter()
            .filter(|message| !(message.sender_id == DISPLAY_ID && message.opcode == 0))
            .collect()
    }

    /// Names of the threads that read from the transport
    pub fn reader_threads(&self) -> Vec<Option<String>> {
        self.reader_threads.lock().unwrap().clone()
    }
}
