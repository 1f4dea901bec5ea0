// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The graphics serializer (§4.7): typed draw builders that populate a
//! `gfx_cmd` union and post it to the renderer proxy over the bus, plus the
//! wire encoding the renderer proxy uses once it forwards a command over the
//! link.
#![cfg_attr(not(test), no_std)]

mod command;
mod serializer;

pub use command::{
    Color, GfxCommand, Rect, SCREEN_CANVAS_ID, SUB_CMD_CLEAR, SUB_CMD_CREATE_CANVAS,
    SUB_CMD_DELETE_CANVAS, SUB_CMD_DRAW_CIRCLE, SUB_CMD_DRAW_LINE, SUB_CMD_DRAW_PIXEL,
    SUB_CMD_DRAW_RECT, SUB_CMD_DRAW_STRING, SUB_CMD_FILL_CIRCLE, SUB_CMD_FILL_RECT,
    SUB_CMD_FILL_SCREEN, SUB_CMD_PUSH_CANVAS, SUB_CMD_SET_TARGET,
};
pub use serializer::Serializer;
