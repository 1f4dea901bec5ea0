// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-process graphics serializer (§4.7): typed builders that populate a
//! [`GfxCommand`] and post it to the renderer proxy over the bus.

use crate::command::{Color, GfxCommand, Rect, SCREEN_CANVAS_ID};
use abi::constants::{MAX_TEXT_LEN, PAYLOAD_CAP};
use abi::{err, ProcessId};
use heapless::Vec as HVec;
use ringbuf::*;
use rt_bus::Bus;
use rt_rtos::Rtos;

/// How long a fire-and-forget draw call blocks if the renderer proxy's queue
/// is momentarily full. Not specified by §6; chosen short enough that a
/// stalled renderer degrades the caller gracefully rather than wedging it.
const POST_TIMEOUT_MS: u32 = 50;

/// `create_canvas`'s own bound, per §4.7: "synchronous link request... with a
/// 1 s timeout".
const CREATE_CANVAS_TIMEOUT_MS: u32 = 1000;

ringbuf!(Trace, 16, Trace::None);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Trace {
    None,
    TextTruncated { requested: u16, truncated_to: u16 },
    PixelClipped { canvas_id: u16, x: i16, y: i16 },
    CreateCanvasTimedOut,
}

struct State {
    current_target: u16,
    clip: Option<Rect>,
    next_local_canvas_id: u16,
    initialized: bool,
}

/// One process's view onto the graphics subsystem. Holds no link access of
/// its own -- everything goes through `bus`, per §4.10's "the proxy is the
/// single writer to the link".
pub struct Serializer<'a, R: Rtos> {
    bus: &'a Bus<R>,
    own_pid: ProcessId,
    state: core::cell::RefCell<State>,
}

impl<'a, R: Rtos> Serializer<'a, R> {
    pub fn new(bus: &'a Bus<R>, own_pid: ProcessId) -> Self {
        Serializer {
            bus,
            own_pid,
            state: core::cell::RefCell::new(State {
                current_target: SCREEN_CANVAS_ID,
                clip: None,
                next_local_canvas_id: 1,
                initialized: false,
            }),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.state.borrow().initialized
    }

    pub fn mark_initialized(&self) {
        self.state.borrow_mut().initialized = true;
    }

    pub fn set_clip(&self, clip: Option<Rect>) {
        self.state.borrow_mut().clip = clip;
    }

    pub fn current_target(&self) -> u16 {
        self.state.borrow().current_target
    }

    fn post(&self, cmd: GfxCommand) -> abi::Result<()> {
        let msg = cmd.to_message(self.own_pid)?;
        self.bus.send(ProcessId::RENDERER_PROXY, msg, POST_TIMEOUT_MS)
    }

    pub fn draw_pixel(&self, x: i16, y: i16, color: Color) -> abi::Result<()> {
        let canvas_id = self.current_target();
        if let Some(clip) = self.state.borrow().clip {
            if !clip.contains(x, y) {
                ringbuf_entry!(Trace::PixelClipped { canvas_id, x, y });
                return Ok(());
            }
        }
        self.post(GfxCommand::DrawPixel { canvas_id, x, y, color })
    }

    pub fn draw_line(&self, x1: i16, y1: i16, x2: i16, y2: i16, color: Color) -> abi::Result<()> {
        let canvas_id = self.current_target();
        self.post(GfxCommand::DrawLine { canvas_id, x1, y1, x2, y2, color })
    }

    pub fn draw_rect(&self, rect: Rect, color: Color) -> abi::Result<()> {
        let canvas_id = self.current_target();
        self.post(GfxCommand::DrawRect { canvas_id, rect, color })
    }

    pub fn fill_rect(&self, rect: Rect, color: Color) -> abi::Result<()> {
        let canvas_id = self.current_target();
        self.post(GfxCommand::FillRect { canvas_id, rect, color })
    }

    pub fn draw_circle(&self, cx: i16, cy: i16, r: i16, color: Color) -> abi::Result<()> {
        let canvas_id = self.current_target();
        self.post(GfxCommand::DrawCircle { canvas_id, cx, cy, r, color })
    }

    pub fn fill_circle(&self, cx: i16, cy: i16, r: i16, color: Color) -> abi::Result<()> {
        let canvas_id = self.current_target();
        self.post(GfxCommand::FillCircle { canvas_id, cx, cy, r, color })
    }

    /// Truncates `text` to fit both `MAX_TEXT_LEN` and the room left in a
    /// `PAYLOAD_CAP`-sized bus message once the rest of the command and its
    /// msgpack/enum-tag overhead are accounted for, then warns if truncated.
    pub fn draw_string(&self, x: i16, y: i16, color: Color, text: &str) -> abi::Result<()> {
        const OVERHEAD_MARGIN: usize = 32;
        let safe_cap = (PAYLOAD_CAP - OVERHEAD_MARGIN).min(MAX_TEXT_LEN);
        let mut cap = safe_cap.min(text.len());
        while cap > 0 && !text.is_char_boundary(cap) {
            cap -= 1;
        }
        if cap < text.len() {
            ringbuf_entry!(Trace::TextTruncated {
                requested: text.len() as u16,
                truncated_to: cap as u16,
            });
        }
        let mut bytes: HVec<u8, MAX_TEXT_LEN> = HVec::new();
        bytes.extend_from_slice(&text.as_bytes()[..cap]).map_err(|_| err::invalid_param())?;
        let canvas_id = self.current_target();
        self.post(GfxCommand::DrawString { canvas_id, x, y, color, text: bytes })
    }

    pub fn clear(&self) -> abi::Result<()> {
        let canvas_id = self.current_target();
        self.post(GfxCommand::Clear { canvas_id })
    }

    pub fn fill_screen(&self, color: Color) -> abi::Result<()> {
        self.post(GfxCommand::FillScreen { color })
    }

    /// Synchronous per §4.7: posts the request, then blocks on this
    /// process's own queue for the reply (SPEC_FULL's resolution of the
    /// "how does create_canvas reach the single link writer" ambiguity).
    pub fn create_canvas(&self, width: u16, height: u16) -> abi::Result<u16> {
        {
            let mut state = self.state.borrow_mut();
            state.next_local_canvas_id = state.next_local_canvas_id.wrapping_add(1);
        }
        self.post(GfxCommand::CreateCanvas {
            width,
            height,
            reply_to: self.own_pid,
        })
        .map_err(|_| err::failed())?;

        let reply = self
            .bus
            .receive(self.own_pid, CREATE_CANVAS_TIMEOUT_MS)
            .map_err(|_| {
                ringbuf_entry!(Trace::CreateCanvasTimedOut);
                err::failed()
            })?;
        match GfxCommand::from_message(&reply) {
            Ok(GfxCommand::CanvasCreated { canvas_id }) => Ok(canvas_id),
            _ => Err(err::failed()),
        }
    }

    /// If the deleted canvas is the current target, falls back to the
    /// screen canvas before sending, per §4.7.
    pub fn delete_canvas(&self, id: u16) -> abi::Result<()> {
        {
            let mut state = self.state.borrow_mut();
            if state.current_target == id {
                state.current_target = SCREEN_CANVAS_ID;
            }
        }
        self.post(GfxCommand::DeleteCanvas { canvas_id: id })
    }

    pub fn set_target(&self, id: u16) -> abi::Result<()> {
        self.state.borrow_mut().current_target = id;
        self.post(GfxCommand::SetTarget { target_id: id })
    }

    pub fn push_canvas(
        &self,
        src_id: u16,
        dest_id: u16,
        x: i16,
        y: i16,
        transparent_color: Option<Color>,
    ) -> abi::Result<()> {
        self.post(GfxCommand::PushCanvas {
            canvas_id: src_id,
            dest_id,
            x,
            y,
            transparent_color: transparent_color.unwrap_or(Color::NONE),
        })
    }

    pub fn present(&self) -> abi::Result<()> {
        self.post(GfxCommand::Present)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use abi::MessageClass;
    use rt_bus::QueueConfig;
    use rt_rtos::sim::SimRtos;

    fn setup() -> (Bus<SimRtos>, ProcessId) {
        let bus = Bus::init(SimRtos::new());
        let app = ProcessId(3);
        bus.create_queue(app, QueueConfig { capacity: 4 }).unwrap();
        bus.create_queue(ProcessId::RENDERER_PROXY, QueueConfig { capacity: 8 }).unwrap();
        (bus, app)
    }

    #[test]
    fn draw_pixel_outside_clip_is_silently_dropped() {
        let (bus, app) = setup();
        let gfx = Serializer::new(&bus, app);
        gfx.set_clip(Some(Rect { x: 0, y: 0, w: 10, h: 10 }));
        gfx.draw_pixel(50, 50, Color(0x1F)).unwrap();
        assert!(bus.stats(ProcessId::RENDERER_PROXY).unwrap().sent == 0);
    }

    #[test]
    fn draw_pixel_inside_clip_is_forwarded() {
        let (bus, app) = setup();
        let gfx = Serializer::new(&bus, app);
        gfx.set_clip(Some(Rect { x: 0, y: 0, w: 10, h: 10 }));
        gfx.draw_pixel(5, 5, Color(0x1F)).unwrap();
        let msg = bus.receive(ProcessId::RENDERER_PROXY, 0).unwrap();
        assert_eq!(msg.class, MessageClass::AppGraphics);
    }

    #[test]
    fn delete_canvas_resets_current_target_when_it_is_the_target() {
        let (bus, app) = setup();
        let gfx = Serializer::new(&bus, app);
        gfx.set_target(7).unwrap();
        let _ = bus.receive(ProcessId::RENDERER_PROXY, 0).unwrap();
        assert_eq!(gfx.current_target(), 7);
        gfx.delete_canvas(7).unwrap();
        let _ = bus.receive(ProcessId::RENDERER_PROXY, 0).unwrap();
        assert_eq!(gfx.current_target(), SCREEN_CANVAS_ID);
    }

    #[test]
    fn create_canvas_times_out_without_a_reply() {
        let (bus, app) = setup();
        let gfx = Serializer::new(&bus, app);
        let err = gfx.create_canvas(64, 64).unwrap_err();
        assert!(err.is(abi::ErrorKind::Failed));
        // Drain the request so it doesn't pollute another test's renderer queue.
        let _ = bus.receive(ProcessId::RENDERER_PROXY, 0);
    }

    #[test]
    fn create_canvas_returns_the_replied_id() {
        let (bus, app) = setup();
        let gfx = Serializer::new(&bus, app);
        let worker_bus = &bus;
        std::thread::scope(|scope| {
            scope.spawn(move || {
                let req = worker_bus.receive(ProcessId::RENDERER_PROXY, 1000).unwrap();
                let cmd = GfxCommand::from_message(&req).unwrap();
                let GfxCommand::CreateCanvas { reply_to, .. } = cmd else { panic!() };
                let reply = GfxCommand::CanvasCreated { canvas_id: 9 }.to_message(ProcessId::RENDERER_PROXY).unwrap();
                worker_bus.send(reply_to, reply, 1000).unwrap();
            });
            let id = gfx.create_canvas(32, 32).unwrap();
            assert_eq!(id, 9);
        });
    }
}
