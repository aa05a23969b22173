use crate::error::{TransportError, VmError};
use crate::heap::HeapRef;
use crate::jdwp::constants::{FLAG_REPLY, HEADER_SIZE};
use crate::jdwp::events::EventRegistry;
use crate::jdwp::id_map::IdMap;
use crate::jdwp::packet::{encode_packet, PacketHeader, PacketStream};
use crate::jdwp::roots::RootTable;
use crate::jdwp::transport::{TcpAcceptor, TcpTransport, Transport};
use crate::keys::ThreadId;
use crate::vm::VirtualMachine;
use crate::{debug_error_log, debug_log};
use std::time::Duration;

pub mod commands;
pub mod constants;
pub mod events;
pub mod id_map;
pub mod packet;
pub mod roots;
pub mod transport;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// An established debugger connection and its per-session tables.
pub struct DebugSession {
    pub transport: Box<dyn Transport>,
    pub id_map: IdMap,
    pub roots: RootTable,
    next_packet_id: u32,
}

impl DebugSession {
    fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            transport,
            id_map: IdMap::new(),
            roots: RootTable::new(),
            next_packet_id: 0,
        }
    }

    pub fn next_packet_id(&mut self) -> u32 {
        self.next_packet_id += 1;
        self.next_packet_id
    }
}

enum AgentState {
    Idle,
    /// Server mode, nobody attached yet; polled between quanta.
    Listening(TcpAcceptor),
    Connected(DebugSession),
}

/// The debugger half of the VM: session state plus the event-request list.
/// Lives inside `VirtualMachine` whether or not debugging is configured.
pub struct DebugAgent {
    state: AgentState,
    pub events: EventRegistry,
    pub(crate) vm_start_sent: bool,
    /// A Dispose command was replied to; the pump closes the session next.
    pub pending_close: bool,
}

impl Default for DebugAgent {
    fn default() -> Self {
        Self::new()
    }
}

impl DebugAgent {
    pub fn new() -> Self {
        Self {
            state: AgentState::Idle,
            events: EventRegistry::new(),
            vm_start_sent: false,
            pending_close: false,
        }
    }

    pub fn session_active(&self) -> bool {
        matches!(self.state, AgentState::Connected(_))
    }

    pub fn session_mut(&mut self) -> Option<&mut DebugSession> {
        match &mut self.state {
            AgentState::Connected(session) => Some(session),
            _ => None,
        }
    }

    /// Objects the debugger pinned; scanned as GC roots while attached.
    pub fn gc_roots(&self) -> Vec<HeapRef> {
        match &self.state {
            AgentState::Connected(session) => session.roots.iter().collect(),
            _ => Vec::new(),
        }
    }

    pub fn has_step_request(&self, tid: ThreadId) -> bool {
        self.events.has_step_for(tid)
    }
}

/// Establishes the configured transport. Attach mode connects right now;
/// server mode binds and either waits (suspend-on-start) or polls from the
/// scheduler loop.
pub fn open_session(vm: &mut VirtualMachine) -> Result<(), VmError> {
    let Some(cfg) = vm.config.jdwp.clone() else {
        return Ok(());
    };
    if cfg.transport != "dt_socket" {
        return Err(VmError::Internal(format!(
            "unknown debugger transport {:?}",
            cfg.transport
        )));
    }

    if cfg.server {
        let bind_addr = if cfg.address.contains(':') {
            cfg.address.clone()
        } else {
            format!("0.0.0.0:{}", cfg.address)
        };
        let mut acceptor = TcpAcceptor::bind(bind_addr.as_str()).map_err(VmError::Transport)?;
        debug_log!("JDWP listening on {}", bind_addr);
        if cfg.suspend_on_start {
            let transport = acceptor
                .accept_blocking(HANDSHAKE_TIMEOUT)
                .map_err(VmError::Transport)?;
            vm.jdwp.state = AgentState::Connected(DebugSession::new(Box::new(transport)));
        } else {
            vm.jdwp.state = AgentState::Listening(acceptor);
        }
    } else {
        let transport = TcpTransport::attach(cfg.address.as_str(), HANDSHAKE_TIMEOUT)
            .map_err(VmError::Transport)?;
        vm.jdwp.state = AgentState::Connected(DebugSession::new(Box::new(transport)));
    }
    Ok(())
}

/// Tears the session down: breakpoint opcodes restored, requests cleared,
/// debugger suspensions undone, pinned roots dropped. The VM keeps running.
pub fn close_session(vm: &mut VirtualMachine) {
    for def in vm.jdwp.events.clear() {
        if let Some(site) = def.breakpoint {
            if let Ok(code) = vm.method_area.get_method_mut(&site.method).code_mut() {
                code[site.pc] = site.saved_opcode;
            }
        }
    }
    for thread in vm.threads.iter_mut() {
        thread.dbg_suspend_count = 0;
        thread
            .status
            .remove(crate::thread::ThreadStatus::DBG_SUSPENDED);
        thread.parked_events.clear();
        thread.bp_cont = None;
    }
    if let AgentState::Connected(mut session) =
        std::mem::replace(&mut vm.jdwp.state, AgentState::Idle)
    {
        session.roots.clear();
        session.id_map.clear();
        session.transport.close();
    } else {
        vm.jdwp.state = AgentState::Idle;
    }
    debug_log!("JDWP session closed");
}

/// Services the debugger between interpreter quanta: accepts a pending
/// connection, drains CLASS_PREPARE backlog, and processes every packet
/// already on the wire (waiting up to `timeout` for the first).
pub fn pump(vm: &mut VirtualMachine) -> Result<(), VmError> {
    pump_with_timeout(vm, Duration::ZERO)
}

pub fn pump_with_timeout(vm: &mut VirtualMachine, timeout: Duration) -> Result<(), VmError> {
    // Pending server-mode connection?
    if let AgentState::Listening(acceptor) = &mut vm.jdwp.state {
        match acceptor.try_accept(HANDSHAKE_TIMEOUT) {
            Ok(Some(transport)) => {
                vm.jdwp.state = AgentState::Connected(DebugSession::new(Box::new(transport)));
                debug_log!("debugger attached");
            }
            Ok(None) => {}
            Err(e) => {
                debug_error_log!("debugger accept failed: {e:?}");
            }
        }
    }

    if !vm.jdwp.session_active() {
        // Nothing listens for prepare events; drop the backlog.
        vm.method_area.take_pending_prepares();
        return Ok(());
    }

    events::report_vm_start(vm)?;
    events::report_class_prepares(vm)?;

    let mut wait = timeout;
    loop {
        let available = {
            let Some(session) = vm.jdwp.session_mut() else {
                return Ok(());
            };
            match session.transport.is_data_available(wait) {
                Ok(available) => available,
                Err(_) => {
                    close_session(vm);
                    return Ok(());
                }
            }
        };
        if !available {
            return Ok(());
        }
        wait = Duration::ZERO;
        if let Err(e) = process_one_packet(vm) {
            match e {
                VmError::Transport(_) => {
                    close_session(vm);
                    return Ok(());
                }
                fatal => return Err(fatal),
            }
        }
        if vm.jdwp.pending_close {
            vm.jdwp.pending_close = false;
            close_session(vm);
        }
        if !vm.jdwp.session_active() {
            return Ok(());
        }
    }
}

fn process_one_packet(vm: &mut VirtualMachine) -> Result<(), VmError> {
    let (header, data) = {
        let session = vm
            .jdwp
            .session_mut()
            .ok_or(VmError::Transport(TransportError::IllegalState))?;
        let mut header_bytes = [0u8; HEADER_SIZE];
        session.transport.read_bytes(&mut header_bytes)?;
        let header = PacketHeader::parse(&header_bytes);
        if (header.length as usize) < HEADER_SIZE {
            return Err(VmError::Transport(TransportError::IllegalArgument));
        }
        let mut data = vec![0u8; header.length as usize - HEADER_SIZE];
        session.transport.read_bytes(&mut data)?;
        (header, data)
    };

    if header.is_reply() {
        // We never await replies from the debugger side.
        return Ok(());
    }

    debug_log!(
        "JDWP command {}.{} id {}",
        header.cmd_set,
        header.cmd,
        header.id
    );
    let mut input = PacketStream::from_bytes(&data);
    let mut output = PacketStream::new();
    let error_code = match commands::dispatch(vm, header.cmd_set, header.cmd, &mut input, &mut output)
    {
        Ok(()) => input.error().unwrap_or(constants::error::NONE),
        Err(code) => code,
    };

    let reply = if error_code == constants::error::NONE {
        encode_packet(header.id, FLAG_REPLY, 0, 0, &output)
    } else {
        let [hi, lo] = error_code.to_be_bytes();
        encode_packet(header.id, FLAG_REPLY, hi, lo, &PacketStream::new())
    };
    let failed = match vm.jdwp.session_mut() {
        Some(session) => session.transport.write_bytes(&reply).is_err(),
        None => false,
    };
    if failed {
        close_session(vm);
    }
    Ok(())
}
