//! Drives a live JDWP session over a real socket: handshake, class and
//! method discovery, a breakpoint round-trip with a Frames inspection, and
//! the VM death notification.

use embla_runtime::class_loader::{ClassProvider, MemoryProvider};
use embla_runtime::classfile::builder::{Assembler, ClassBuilder};
use embla_runtime::classfile::{ClassFile, MethodFlags};
use embla_runtime::config::{JdwpConfig, VmConfig};
use embla_runtime::interpreter::opcode::Opcode as Op;
use embla_runtime::vm::{Console, VirtualMachine};
use std::collections::VecDeque;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::time::Duration;

struct NullConsole;

impl Console for NullConsole {
    fn write_out(&mut self, _bytes: &[u8]) {}
    fn write_err(&mut self, _bytes: &[u8]) {}
}

fn foo_class() -> ClassFile {
    let mut b = ClassBuilder::new("Foo", Some("java/lang/Object"));
    let bar = b.method_ref("Foo", "bar", "()V");

    let mut a = Assembler::new();
    a.op(Op::Iconst0 as u8).op(Op::Pop as u8).op(Op::Return as u8);
    b.method("bar", "()V", MethodFlags::PUBLIC | MethodFlags::STATIC, a.finish(1, 0));

    let mut a = Assembler::new();
    a.op_u16(Op::Invokestatic as u8, bar).op(Op::Return as u8);
    b.method(
        "main",
        "([Ljava/lang/String;)V",
        MethodFlags::PUBLIC | MethodFlags::STATIC,
        a.finish(0, 1),
    );
    b.finish()
}

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

// -- minimal wire client ------------------------------------------------------

fn be_u16(b: &[u8]) -> u16 {
    u16::from_be_bytes([b[0], b[1]])
}

fn be_u32(b: &[u8]) -> u32 {
    u32::from_be_bytes([b[0], b[1], b[2], b[3]])
}

fn be_u64(b: &[u8]) -> u64 {
    u64::from_be_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]])
}

struct Client {
    stream: TcpStream,
    next_id: u32,
    events: VecDeque<Vec<u8>>,
}

impl Client {
    fn connect(port: u16) -> Client {
        let mut last_error = None;
        for _ in 0..100 {
            match TcpStream::connect(("127.0.0.1", port)) {
                Ok(mut stream) => {
                    stream.write_all(b"JDWP-Handshake").unwrap();
                    let mut reply = [0u8; 14];
                    stream.read_exact(&mut reply).unwrap();
                    assert_eq!(&reply, b"JDWP-Handshake");
                    stream
                        .set_read_timeout(Some(Duration::from_secs(20)))
                        .unwrap();
                    return Client {
                        stream,
                        next_id: 0,
                        events: VecDeque::new(),
                    };
                }
                Err(e) => {
                    last_error = Some(e);
                    std::thread::sleep(Duration::from_millis(20));
                }
            }
        }
        panic!("debugger could not attach: {last_error:?}");
    }

    fn read_packet(&mut self) -> (u32, u8, u8, u8, Vec<u8>) {
        let mut header = [0u8; 11];
        self.stream.read_exact(&mut header).unwrap();
        let length = be_u32(&header[0..4]) as usize;
        let id = be_u32(&header[4..8]);
        let mut data = vec![0u8; length - 11];
        self.stream.read_exact(&mut data).unwrap();
        (id, header[8], header[9], header[10], data)
    }

    /// Sends a command and waits for its reply, queueing any events that
    /// arrive in between.
    fn command(&mut self, set: u8, cmd: u8, payload: &[u8]) -> (u16, Vec<u8>) {
        self.next_id += 1;
        let id = self.next_id;
        let mut packet = Vec::new();
        packet.extend_from_slice(&((11 + payload.len()) as u32).to_be_bytes());
        packet.extend_from_slice(&id.to_be_bytes());
        packet.push(0);
        packet.push(set);
        packet.push(cmd);
        packet.extend_from_slice(payload);
        self.stream.write_all(&packet).unwrap();

        loop {
            let (reply_id, flags, b9, b10, data) = self.read_packet();
            if flags & 0x80 != 0 {
                assert_eq!(reply_id, id, "interleaved replies are not expected");
                return (u16::from_be_bytes([b9, b10]), data);
            }
            assert_eq!((b9, b10), (64, 100), "only composite events expected");
            self.events.push_back(data);
        }
    }

    /// Next composite event payload (suspendPolicy, [(kind, requestID, rest)]).
    fn next_event(&mut self) -> Vec<u8> {
        if let Some(event) = self.events.pop_front() {
            return event;
        }
        loop {
            let (_, flags, b9, b10, data) = self.read_packet();
            if flags & 0x80 == 0 {
                assert_eq!((b9, b10), (64, 100));
                return data;
            }
        }
    }
}

#[test]
fn breakpoint_round_trip_with_frames() {
    let port = free_port();
    let mut provider = MemoryProvider::new();
    provider.add(foo_class());
    let mut config = VmConfig::new("Foo");
    config.heap_size = 1024 * 1024;
    config.jdwp = Some(JdwpConfig {
        transport: "dt_socket".to_string(),
        address: format!("127.0.0.1:{port}"),
        server: true,
        suspend_on_start: true,
    });
    let mut vm = VirtualMachine::build(
        config,
        vec![Box::new(provider) as Box<dyn ClassProvider>],
        Box::new(NullConsole),
    )
    .expect("VM bootstrap");

    let vm_thread = std::thread::spawn(move || vm.run().expect("run"));
    let mut client = Client::connect(port);

    // 1. The automatic VM_START event, suspend policy ALL.
    let start_event = client.next_event();
    assert_eq!(start_event[0], 2, "suspend_on_start demands policy ALL");
    assert_eq!(be_u32(&start_event[1..5]), 1);
    assert_eq!(start_event[5], 90); // VM_START
    assert_eq!(be_u32(&start_event[6..10]), 0); // automatic request id

    // 2. Find Foo and its bar method.
    let mut payload = Vec::new();
    payload.extend_from_slice(&4u32.to_be_bytes());
    payload.extend_from_slice(b"LFoo;");
    let (err, data) = client.command(1, 2, &payload); // ClassesBySignature
    assert_eq!(err, 0);
    assert_eq!(be_u32(&data[0..4]), 1);
    let type_id = be_u32(&data[5..9]);

    let (err, data) = client.command(2, 5, &type_id.to_be_bytes()); // Methods
    assert_eq!(err, 0);
    let mut bar_method_id = None;
    let mut cursor = 4;
    for _ in 0..be_u32(&data[0..4]) {
        let method_id = be_u64(&data[cursor..cursor + 8]);
        cursor += 8;
        let name_len = be_u32(&data[cursor..cursor + 4]) as usize;
        cursor += 4;
        let name = std::str::from_utf8(&data[cursor..cursor + name_len]).unwrap().to_string();
        cursor += name_len;
        let sig_len = be_u32(&data[cursor..cursor + 4]) as usize;
        cursor += 4 + sig_len;
        cursor += 4; // modBits
        if name == "bar" {
            bar_method_id = Some(method_id);
        }
    }
    let bar_method_id = bar_method_id.expect("bar listed");

    // 3. Breakpoint at Foo.bar pc 0, suspending the event thread.
    let mut payload = Vec::new();
    payload.push(2); // BREAKPOINT
    payload.push(1); // SUSPEND_EVENT_THREAD
    payload.extend_from_slice(&1i32.to_be_bytes());
    payload.push(7); // LocationOnly
    payload.push(1); // CLASS tag
    payload.extend_from_slice(&type_id.to_be_bytes());
    payload.extend_from_slice(&bar_method_id.to_be_bytes());
    payload.extend_from_slice(&0u64.to_be_bytes());
    let (err, data) = client.command(15, 1, &payload); // EventRequest.Set
    assert_eq!(err, 0);
    let request_id = be_u32(&data[0..4]) as i32;

    // 4. Let the VM run into it.
    let (err, _) = client.command(1, 9, &[]); // VirtualMachine.Resume
    assert_eq!(err, 0);

    let event = client.next_event();
    assert_eq!(event[0], 1, "breakpoint requested EVENT_THREAD");
    assert_eq!(be_u32(&event[1..5]), 1);
    assert_eq!(event[5], 2); // BREAKPOINT
    assert_eq!(be_u32(&event[6..10]) as i32, request_id);
    let thread_id = be_u32(&event[10..14]);
    assert_eq!(event[14], 1); // CLASS tag
    assert_eq!(be_u32(&event[15..19]), type_id);
    assert_eq!(be_u64(&event[19..27]), bar_method_id);
    assert_eq!(be_u64(&event[27..35]), 0); // pc 0

    // 5. Frames of the suspended thread: bar on top of main.
    let mut payload = Vec::new();
    payload.extend_from_slice(&thread_id.to_be_bytes());
    payload.extend_from_slice(&0i32.to_be_bytes());
    payload.extend_from_slice(&(-1i32).to_be_bytes());
    let (err, data) = client.command(11, 6, &payload); // ThreadReference.Frames
    assert_eq!(err, 0);
    assert_eq!(be_u32(&data[0..4]), 2);
    // frameID u64, then location tag/class/method/index of the top frame.
    assert_eq!(data[12], 1);
    assert_eq!(be_u32(&data[13..17]), type_id);
    assert_eq!(be_u64(&data[17..25]), bar_method_id);
    assert_eq!(be_u64(&data[25..33]), 0);

    // 6. Resume the thread; the program runs to completion.
    let (err, _) = client.command(11, 3, &thread_id.to_be_bytes()); // ThreadReference.Resume
    assert_eq!(err, 0);

    // 7. VM_DEATH arrives as the VM winds down.
    loop {
        let event = client.next_event();
        let kind = event[5];
        if kind == 99 {
            break;
        }
    }

    let code = vm_thread.join().expect("vm thread");
    assert_eq!(code, 0);
}
