// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `gfx_cmd` union (§4.7, wire table in §6), as a Rust enum.
//!
//! Grounded in `fmrb_gfx_commands.c`'s tagged union: one variant per draw
//! primitive, `i16` coordinates, a single-byte RGB332 color. The variant
//! itself is what travels inside an `AppGraphics` bus message (msgpack'd via
//! `to_message`/`from_message`); `sub_cmd()` is the wire id the renderer
//! proxy uses once it forwards a command through the link.

use abi::constants::MAX_TEXT_LEN;
use abi::{err, Message, MessageClass, ProcessId};
use heapless::Vec as HVec;
use serde::{Deserialize, Serialize};

/// RGB332: 3 bits red, 3 bits green, 2 bits blue, packed into one byte.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Color(pub u8);

impl Color {
    /// Reserved sentinel for `transparent_color` fields: "no transparency".
    pub const NONE: Color = Color(0xFF);
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: i16,
    pub y: i16,
    pub w: i16,
    pub h: i16,
}

impl Rect {
    pub fn contains(&self, x: i16, y: i16) -> bool {
        x >= self.x && x < self.x + self.w && y >= self.y && y < self.y + self.h
    }
}

/// Wire sub_cmd ids from §6. Only the renderer proxy needs these, to
/// translate a drained `GfxCommand` into the byte-level link request; the
/// bus transit itself carries the whole enum, not these ids.
pub const SUB_CMD_DRAW_PIXEL: u8 = 0x10;
pub const SUB_CMD_DRAW_LINE: u8 = 0x11;
pub const SUB_CMD_DRAW_RECT: u8 = 0x14;
pub const SUB_CMD_FILL_RECT: u8 = 0x15;
pub const SUB_CMD_DRAW_CIRCLE: u8 = 0x18;
pub const SUB_CMD_FILL_CIRCLE: u8 = 0x19;
pub const SUB_CMD_DRAW_STRING: u8 = 0x20;
pub const SUB_CMD_CLEAR: u8 = 0x30;
pub const SUB_CMD_FILL_SCREEN: u8 = 0x31;
pub const SUB_CMD_CREATE_CANVAS: u8 = 0x50;
pub const SUB_CMD_DELETE_CANVAS: u8 = 0x51;
pub const SUB_CMD_SET_TARGET: u8 = 0x52;
pub const SUB_CMD_PUSH_CANVAS: u8 = 0x53;

/// The "screen" canvas: always present, never created or destroyed.
pub const SCREEN_CANVAS_ID: u16 = 0;

/// One typed graphics command, as handed to the bus (app -> renderer proxy)
/// or back (renderer proxy -> app, for the `CreateCanvas` reply only).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum GfxCommand {
    DrawPixel { canvas_id: u16, x: i16, y: i16, color: Color },
    DrawLine { canvas_id: u16, x1: i16, y1: i16, x2: i16, y2: i16, color: Color },
    DrawRect { canvas_id: u16, rect: Rect, color: Color },
    FillRect { canvas_id: u16, rect: Rect, color: Color },
    DrawCircle { canvas_id: u16, cx: i16, cy: i16, r: i16, color: Color },
    FillCircle { canvas_id: u16, cx: i16, cy: i16, r: i16, color: Color },
    DrawString { canvas_id: u16, x: i16, y: i16, color: Color, text: HVec<u8, MAX_TEXT_LEN> },
    Clear { canvas_id: u16 },
    FillScreen { color: Color },
    /// Resolved Open Question (SPEC_FULL §4.7): canvas creation is mediated
    /// by the bus, not called directly into the link from app code.
    CreateCanvas { width: u16, height: u16, reply_to: ProcessId },
    /// The renderer proxy's reply to `CreateCanvas`, posted back to
    /// `reply_to`'s own queue.
    CanvasCreated { canvas_id: u16 },
    DeleteCanvas { canvas_id: u16 },
    SetTarget { target_id: u16 },
    PushCanvas {
        canvas_id: u16,
        dest_id: u16,
        x: i16,
        y: i16,
        transparent_color: Color,
    },
    Present,
}

impl GfxCommand {
    /// Wire sub_cmd id this command maps to once the renderer proxy forwards
    /// it over the link (§6). `CreateCanvas`/`CanvasCreated` are bus-only:
    /// the proxy issues its own `send_sync` for canvas creation rather than
    /// forwarding this variant's bytes verbatim, so they have no id here.
    pub fn sub_cmd(&self) -> Option<u8> {
        Some(match self {
            GfxCommand::DrawPixel { .. } => SUB_CMD_DRAW_PIXEL,
            GfxCommand::DrawLine { .. } => SUB_CMD_DRAW_LINE,
            GfxCommand::DrawRect { .. } => SUB_CMD_DRAW_RECT,
            GfxCommand::FillRect { .. } => SUB_CMD_FILL_RECT,
            GfxCommand::DrawCircle { .. } => SUB_CMD_DRAW_CIRCLE,
            GfxCommand::FillCircle { .. } => SUB_CMD_FILL_CIRCLE,
            GfxCommand::DrawString { .. } => SUB_CMD_DRAW_STRING,
            GfxCommand::Clear { .. } => SUB_CMD_CLEAR,
            GfxCommand::FillScreen { .. } => SUB_CMD_FILL_SCREEN,
            GfxCommand::DeleteCanvas { .. } => SUB_CMD_DELETE_CANVAS,
            GfxCommand::SetTarget { .. } => SUB_CMD_SET_TARGET,
            GfxCommand::PushCanvas { .. } => SUB_CMD_PUSH_CANVAS,
            GfxCommand::CreateCanvas { .. } | GfxCommand::CanvasCreated { .. } => return None,
            GfxCommand::Present => return None,
        })
    }

    /// Packs this command into the byte layout the renderer proxy hands to
    /// `LinkTransport::send`/`send_sync` as the payload. Field order matches
    /// §6's listing for each sub_cmd.
    pub fn encode_link_payload(&self, out: &mut HVec<u8, 260>) -> abi::Result<()> {
        out.clear();
        let too_large = || err::detailed(abi::ErrorKind::InvalidParam, abi::ErrorDetail::FrameTooLarge);
        macro_rules! put_u16 {
            ($v:expr) => {
                out.extend_from_slice(&$v.to_le_bytes()).map_err(|_| too_large())?
            };
        }
        macro_rules! put_i16 {
            ($v:expr) => {
                out.extend_from_slice(&$v.to_le_bytes()).map_err(|_| too_large())?
            };
        }
        match self {
            GfxCommand::DrawPixel { canvas_id, x, y, color } => {
                put_u16!(canvas_id);
                put_i16!(x);
                put_i16!(y);
                out.push(color.0).map_err(|_| too_large())?;
            }
            GfxCommand::DrawLine { canvas_id, x1, y1, x2, y2, color } => {
                put_u16!(canvas_id);
                put_i16!(x1);
                put_i16!(y1);
                put_i16!(x2);
                put_i16!(y2);
                out.push(color.0).map_err(|_| too_large())?;
            }
            GfxCommand::DrawRect { canvas_id, rect, color } | GfxCommand::FillRect { canvas_id, rect, color } => {
                put_u16!(canvas_id);
                put_i16!(rect.x);
                put_i16!(rect.y);
                put_i16!(rect.w);
                put_i16!(rect.h);
                out.push(color.0).map_err(|_| too_large())?;
            }
            GfxCommand::DrawCircle { canvas_id, cx, cy, r, color }
            | GfxCommand::FillCircle { canvas_id, cx, cy, r, color } => {
                put_u16!(canvas_id);
                put_i16!(cx);
                put_i16!(cy);
                put_i16!(r);
                out.push(color.0).map_err(|_| too_large())?;
            }
            GfxCommand::DrawString { canvas_id, x, y, color, text } => {
                put_u16!(canvas_id);
                put_i16!(x);
                put_i16!(y);
                out.push(color.0).map_err(|_| too_large())?;
                put_u16!((text.len() as u16));
                out.extend_from_slice(text).map_err(|_| too_large())?;
            }
            GfxCommand::Clear { canvas_id } => put_u16!(canvas_id),
            GfxCommand::FillScreen { color } => out.push(color.0).map_err(|_| too_large())?,
            GfxCommand::DeleteCanvas { canvas_id } => put_u16!(canvas_id),
            GfxCommand::SetTarget { target_id } => put_u16!(target_id),
            GfxCommand::PushCanvas { canvas_id, dest_id, x, y, transparent_color } => {
                put_u16!(canvas_id);
                put_u16!(dest_id);
                put_i16!(x);
                put_i16!(y);
                out.push(transparent_color.0).map_err(|_| too_large())?;
            }
            GfxCommand::CreateCanvas { width, height, .. } => {
                put_u16!(width);
                put_u16!(height);
            }
            GfxCommand::CanvasCreated { .. } | GfxCommand::Present => {}
        }
        Ok(())
    }

    /// Encodes this command as an `AppGraphics` bus message from `src_pid`.
    pub fn to_message(&self, src_pid: ProcessId) -> abi::Result<Message> {
        let bytes = rmp_serde::to_vec(self).map_err(|_| err::invalid_param())?;
        Message::new(MessageClass::AppGraphics, src_pid, &bytes).ok_or_else(too_large_err)
    }

    pub fn from_message(msg: &Message) -> abi::Result<GfxCommand> {
        rmp_serde::from_slice(msg.payload()).map_err(|_| err::invalid_param())
    }
}

fn too_large_err() -> abi::Error {
    err::detailed(abi::ErrorKind::InvalidParam, abi::ErrorDetail::FrameTooLarge)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_a_bus_message() {
        let cmd = GfxCommand::DrawPixel {
            canvas_id: 3,
            x: 10,
            y: -4,
            color: Color(0x1F),
        };
        let msg = cmd.to_message(ProcessId(5)).unwrap();
        assert_eq!(msg.src_pid, ProcessId(5));
        let decoded = GfxCommand::from_message(&msg).unwrap();
        match decoded {
            GfxCommand::DrawPixel { canvas_id, x, y, color } => {
                assert_eq!((canvas_id, x, y, color), (3, 10, -4, Color(0x1F)));
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn link_payload_packs_fill_rect_fields_in_wire_order() {
        let cmd = GfxCommand::FillRect {
            canvas_id: 1,
            rect: Rect { x: 2, y: 3, w: 4, h: 5 },
            color: Color(0x07),
        };
        assert_eq!(cmd.sub_cmd(), Some(SUB_CMD_FILL_RECT));
        let mut buf = HVec::new();
        cmd.encode_link_payload(&mut buf).unwrap();
        assert_eq!(&buf[..2], &1u16.to_le_bytes());
        assert_eq!(&buf[2..4], &2i16.to_le_bytes());
        assert_eq!(buf[buf.len() - 1], 0x07);
    }

    #[test]
    fn create_canvas_has_no_wire_sub_cmd() {
        let cmd = GfxCommand::CreateCanvas { width: 1, height: 1, reply_to: ProcessId(2) };
        assert_eq!(cmd.sub_cmd(), None);
    }
}
