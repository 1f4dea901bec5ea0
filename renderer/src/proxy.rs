// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The proxy's drain-dispatch-flush loop.
//!
//! Grounded in §4.10's four-step description ("receive one message, act on
//! it, always pump the link, tick on a schedule") and SPEC_FULL's resolution
//! of the flush-ordering Open Question: [`RendererProxy::process_one`] drains
//! exactly one bus message per call, so a `Present`'s flush over the link
//! always completes before the next message is drained -- there is no
//! "enqueue into next frame" race to resolve.

use abi::constants::{MAX_PROCESSES, RENDERER_COMMAND_BUFFER_CAPACITY, RENDERER_RECEIVE_TIMEOUT_MS, RENDERER_TICK_MS};
use abi::{MessageClass, ProcessId};
use core::cell::{Cell, RefCell};
use heapless::Vec as HVec;
use ringbuf::*;
use rt_bus::Bus;
use rt_gfx::{Color, GfxCommand, SCREEN_CANVAS_ID};
use rt_link::{FrameDriver, LinkTransport};
use rt_rtos::Rtos;

/// Control-class sub_cmd for the mandatory "init display" frame (§6): width,
/// height, and color depth, sent once before any graphics frame.
pub const SUB_CMD_INIT_DISPLAY: u8 = 0x01;

/// §4.10 calls for "a periodic tick notification" but §6's sub_cmd table
/// only numbers `0x01`; this core reserves the next control sub_cmd for it
/// rather than leave the tick with no wire identity.
pub const SUB_CMD_UPDATE: u8 = 0x02;

const KIND_CONTROL: u8 = 1;
const KIND_GRAPHICS: u8 = 2;

/// §4.7's "synchronous link request... with a 1 s timeout" for canvas
/// creation, from the proxy's side of the bus-mediated request/reply.
const CREATE_CANVAS_LINK_TIMEOUT_MS: u32 = 1000;

/// How long the reply post to a waiting `create_canvas` caller may block.
/// Short: the caller's own queue should never be this full for this long.
const REPLY_POST_TIMEOUT_MS: u32 = 50;

ringbuf!(Trace, 16, Trace::None);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Trace {
    None,
    CreateCanvasFailed { requester: u8 },
    DrawBufferFlushed { depth: usize },
    TickEmitted,
}

/// Per-source-process bookkeeping the proxy needs to turn a bare `Present`
/// (which carries no fields of its own) into a `push_canvas` call: the last
/// canvas that process drew to, and the window position `runtime`'s
/// composition root assigned it at spawn time.
struct SourceState {
    last_canvas: [u16; MAX_PROCESSES],
    window_xy: [(i16, i16); MAX_PROCESSES],
}

impl SourceState {
    fn new() -> Self {
        SourceState {
            last_canvas: [SCREEN_CANVAS_ID; MAX_PROCESSES],
            window_xy: [(0, 0); MAX_PROCESSES],
        }
    }
}

/// The renderer proxy (§4.10): owns the link and the batched draw buffer,
/// and is the only process either of those is ever touched from.
pub struct RendererProxy<'a, R: Rtos, D: FrameDriver> {
    rtos: R,
    bus: &'a Bus<R>,
    transport: &'a LinkTransport<R, D>,
    own_pid: ProcessId,
    buffer: RefCell<HVec<GfxCommand, RENDERER_COMMAND_BUFFER_CAPACITY>>,
    sources: RefCell<SourceState>,
    last_tick_ticks: Cell<u64>,
}

impl<'a, R: Rtos, D: FrameDriver> RendererProxy<'a, R, D> {
    pub fn new(rtos: R, bus: &'a Bus<R>, transport: &'a LinkTransport<R, D>, own_pid: ProcessId) -> Self {
        RendererProxy {
            rtos,
            bus,
            transport,
            own_pid,
            buffer: RefCell::new(HVec::new()),
            sources: RefCell::new(SourceState::new()),
            last_tick_ticks: Cell::new(0),
        }
    }

    /// Sends the mandatory "init display" control frame. Must be called
    /// before any graphics frame reaches the link (§6); `runtime`'s
    /// composition root calls this once at startup.
    pub fn init_display(&self, width: u16, height: u16, color_depth: u8) -> abi::Result<()> {
        let mut payload = [0u8; 5];
        payload[0..2].copy_from_slice(&width.to_le_bytes());
        payload[2..4].copy_from_slice(&height.to_le_bytes());
        payload[4] = color_depth;
        self.transport.send(KIND_CONTROL, SUB_CMD_INIT_DISPLAY, &payload)
    }

    /// Records the screen position assigned to `pid`'s window, consulted
    /// when that process's `Present` is composited onto the screen canvas.
    /// Called by `runtime`'s composition root at spawn time, where the
    /// process table's `WindowConfig` is known.
    pub fn register_window(&self, pid: ProcessId, x: i16, y: i16) {
        if let Some(slot) = self.sources.borrow_mut().window_xy.get_mut(pid.index()) {
            *slot = (x, y);
        }
    }

    /// One iteration of the proxy's loop (§4.10): drain at most one bus
    /// message, dispatch it, pump the link, and return whether a message was
    /// actually drained. Callers run this in an unconditional loop, calling
    /// [`Self::maybe_emit_tick`] alongside it on their own schedule.
    pub fn process_one(&self) -> bool {
        let drained = match self.bus.receive(self.own_pid, RENDERER_RECEIVE_TIMEOUT_MS) {
            Ok(msg) => {
                if msg.class == MessageClass::AppGraphics {
                    if let Ok(cmd) = GfxCommand::from_message(&msg) {
                        self.dispatch(msg.src_pid, cmd);
                    }
                }
                true
            }
            Err(_) => false,
        };
        self.transport.process();
        drained
    }

    /// Emits the periodic "update" notification if at least
    /// `RENDERER_TICK_MS` have elapsed since the last one. Callers poll this
    /// alongside `process_one` every iteration; it is a no-op between ticks.
    pub fn maybe_emit_tick(&self) -> bool {
        let now = self.rtos.tick_now();
        let interval = self.rtos.ms_to_ticks(RENDERER_TICK_MS).0 as u64;
        if now.saturating_sub(self.last_tick_ticks.get()) < interval {
            return false;
        }
        self.last_tick_ticks.set(now);
        ringbuf_entry!(Trace::TickEmitted);
        let _ = self.transport.send(KIND_CONTROL, SUB_CMD_UPDATE, &[]);
        true
    }

    fn dispatch(&self, src_pid: ProcessId, cmd: GfxCommand) {
        self.track_canvas(src_pid, &cmd);
        match cmd {
            GfxCommand::CreateCanvas { width, height, reply_to } => {
                self.handle_create_canvas(width, height, reply_to);
            }
            GfxCommand::Present => self.handle_present(src_pid),
            GfxCommand::SetTarget { .. } | GfxCommand::DeleteCanvas { .. } | GfxCommand::PushCanvas { .. } => {
                self.forward_direct(&cmd);
            }
            // Never arrives from an app; this is the proxy's own reply shape.
            GfxCommand::CanvasCreated { .. } => {}
            draw => self.buffer_draw(draw),
        }
    }

    /// Tracks the last canvas each source process touched, so a later bare
    /// `Present` from that process knows what to composite.
    fn track_canvas(&self, src_pid: ProcessId, cmd: &GfxCommand) {
        let canvas_id = match cmd {
            GfxCommand::DrawPixel { canvas_id, .. }
            | GfxCommand::DrawLine { canvas_id, .. }
            | GfxCommand::DrawRect { canvas_id, .. }
            | GfxCommand::FillRect { canvas_id, .. }
            | GfxCommand::DrawCircle { canvas_id, .. }
            | GfxCommand::FillCircle { canvas_id, .. }
            | GfxCommand::DrawString { canvas_id, .. }
            | GfxCommand::Clear { canvas_id } => Some(*canvas_id),
            GfxCommand::SetTarget { target_id } => Some(*target_id),
            _ => None,
        };
        if let Some(id) = canvas_id {
            if let Some(slot) = self.sources.borrow_mut().last_canvas.get_mut(src_pid.index()) {
                *slot = id;
            }
        }
    }

    /// Appends a draw primitive to the batch, flushing first if it is full.
    fn buffer_draw(&self, cmd: GfxCommand) {
        if self.buffer.borrow().is_full() {
            self.flush_draws();
        }
        // The buffer was just flushed if full, so this always has room.
        let _ = self.buffer.borrow_mut().push(cmd);
    }

    /// Sends every batched draw command over the link, in order, then empties
    /// the batch. Does not touch `push_canvas`/`present` -- that only
    /// happens from [`Self::handle_present`], which calls this first.
    fn flush_draws(&self) {
        let mut buffer = self.buffer.borrow_mut();
        if buffer.is_empty() {
            return;
        }
        ringbuf_entry!(Trace::DrawBufferFlushed { depth: buffer.len() });
        for cmd in buffer.iter() {
            self.send_over_link(cmd);
        }
        buffer.clear();
    }

    fn handle_present(&self, src_pid: ProcessId) {
        self.flush_draws();
        let (x, y) = self
            .sources
            .borrow()
            .window_xy
            .get(src_pid.index())
            .copied()
            .unwrap_or((0, 0));
        let src_canvas = self
            .sources
            .borrow()
            .last_canvas
            .get(src_pid.index())
            .copied()
            .unwrap_or(SCREEN_CANVAS_ID);
        let push = GfxCommand::PushCanvas {
            canvas_id: src_canvas,
            dest_id: SCREEN_CANVAS_ID,
            x,
            y,
            transparent_color: Color::NONE,
        };
        self.send_over_link(&push);
    }

    /// `create_canvas` is bus-mediated (SPEC_FULL §4.7): the proxy issues
    /// its own synchronous link request and, only on success, posts the
    /// reply back to the waiting caller. A failure here is silent -- the
    /// caller's own `bus.receive` times out with no proxy-side error reply.
    fn handle_create_canvas(&self, width: u16, height: u16, reply_to: ProcessId) {
        let mut payload = [0u8; 4];
        payload[0..2].copy_from_slice(&width.to_le_bytes());
        payload[2..4].copy_from_slice(&height.to_le_bytes());
        let mut response = [0u8; 4];
        let outcome = self.transport.send_sync(
            KIND_GRAPHICS,
            rt_gfx::SUB_CMD_CREATE_CANVAS,
            &payload,
            &mut response,
            CREATE_CANVAS_LINK_TIMEOUT_MS,
        );
        let canvas_id = match outcome {
            Ok((status, len)) if status == 0 && len >= 2 => {
                Some(u16::from_le_bytes([response[0], response[1]]))
            }
            _ => None,
        };
        match canvas_id {
            Some(canvas_id) => {
                if let Ok(msg) = GfxCommand::CanvasCreated { canvas_id }.to_message(self.own_pid) {
                    let _ = self.bus.send(reply_to, msg, REPLY_POST_TIMEOUT_MS);
                }
            }
            None => ringbuf_entry!(Trace::CreateCanvasFailed { requester: reply_to.0 }),
        }
    }

    fn forward_direct(&self, cmd: &GfxCommand) {
        self.send_over_link(cmd);
    }

    fn send_over_link(&self, cmd: &GfxCommand) {
        let Some(sub_cmd) = cmd.sub_cmd() else { return };
        let mut payload: HVec<u8, 260> = HVec::new();
        if cmd.encode_link_payload(&mut payload).is_ok() {
            let _ = self.transport.send(KIND_GRAPHICS, sub_cmd, &payload);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use abi::ErrorKind;
    use rt_bus::QueueConfig;
    use rt_link::TransportConfig;
    use rt_rtos::sim::SimRtos;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct LoopbackDriver {
        inbox: Mutex<VecDeque<rt_link::EncodedFrame>>,
        sent: Mutex<Vec<rt_link::EncodedFrame>>,
    }

    impl FrameDriver for Arc<LoopbackDriver> {
        fn write_frame(&mut self, encoded: &[u8]) -> abi::Result<()> {
            let mut sent = self.sent.lock().unwrap();
            let mut f = rt_link::EncodedFrame::new();
            f.extend_from_slice(encoded).unwrap();
            sent.push(f);
            Ok(())
        }

        fn poll_frame(&mut self, out: &mut rt_link::EncodedFrame) -> bool {
            let mut inbox = self.inbox.lock().unwrap();
            if let Some(f) = inbox.pop_front() {
                out.extend_from_slice(&f).unwrap();
                true
            } else {
                false
            }
        }
    }

    fn setup() -> (Bus<SimRtos>, LinkTransport<SimRtos, Arc<LoopbackDriver>>, Arc<LoopbackDriver>, ProcessId) {
        let bus = Bus::init(SimRtos::new());
        let app = ProcessId(3);
        bus.create_queue(app, QueueConfig { capacity: 4 }).unwrap();
        bus.create_queue(ProcessId::RENDERER_PROXY, QueueConfig { capacity: 8 }).unwrap();
        let driver = Arc::new(LoopbackDriver::default());
        let transport = LinkTransport::init(SimRtos::new(), driver.clone(), TransportConfig::default());
        (bus, transport, driver, app)
    }

    #[test]
    fn draw_pixel_is_buffered_not_sent_until_present() {
        let (bus, transport, _driver, app) = setup();
        let proxy = RendererProxy::new(SimRtos::new(), &bus, &transport, ProcessId::RENDERER_PROXY);
        let cmd = GfxCommand::DrawPixel { canvas_id: 0, x: 1, y: 1, color: Color(0x07) };
        bus.send(ProcessId::RENDERER_PROXY, cmd.to_message(app).unwrap(), 0).unwrap();
        assert!(proxy.process_one());
        assert_eq!(proxy.buffer.borrow().len(), 1);
    }

    #[test]
    fn present_flushes_the_buffer_and_pushes_the_canvas() {
        let (bus, transport, driver, app) = setup();
        let proxy = RendererProxy::new(SimRtos::new(), &bus, &transport, ProcessId::RENDERER_PROXY);
        let draw = GfxCommand::DrawPixel { canvas_id: 4, x: 1, y: 1, color: Color(0x07) };
        bus.send(ProcessId::RENDERER_PROXY, draw.to_message(app).unwrap(), 0).unwrap();
        proxy.process_one();
        bus.send(ProcessId::RENDERER_PROXY, GfxCommand::Present.to_message(app).unwrap(), 0).unwrap();
        proxy.process_one();

        assert!(proxy.buffer.borrow().is_empty());
        let sent = driver.sent.lock().unwrap();
        assert!(sent.len() >= 2, "expected the draw and the push_canvas to both reach the link");
    }

    #[test]
    fn create_canvas_request_without_a_link_reply_leaves_the_caller_to_time_out() {
        let (bus, transport, _driver, app) = setup();
        let proxy = RendererProxy::new(SimRtos::new(), &bus, &transport, ProcessId::RENDERER_PROXY);
        let req = GfxCommand::CreateCanvas { width: 8, height: 8, reply_to: app };
        bus.send(ProcessId::RENDERER_PROXY, req.to_message(app).unwrap(), 0).unwrap();
        proxy.process_one();
        let err = bus.receive(app, 0).unwrap_err();
        assert!(err.is(ErrorKind::Timeout));
    }

    #[test]
    fn maybe_emit_tick_only_fires_once_per_interval() {
        let (bus, transport, _driver, _app) = setup();
        let proxy = RendererProxy::new(SimRtos::new(), &bus, &transport, ProcessId::RENDERER_PROXY);
        std::thread::sleep(std::time::Duration::from_millis(20));
        assert!(proxy.maybe_emit_tick());
        assert!(!proxy.maybe_emit_tick());
    }
}
