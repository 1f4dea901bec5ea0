// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The spawner (§4.9): name/path resolution sitting in front of
//! [`crate::table::ProcessTable::spawn`]. The table itself never touches a
//! filesystem; everything here resolves down to a `SpawnAttr` before it
//! reaches the table.

use crate::attr::{LoadSource, SpawnAttr, WindowConfig};
use crate::table::ProcessTable;
use crate::vmhost::{NativeEntry, VmHost};
use abi::constants::MAX_PATH_LEN;
use abi::{err, LoadMode, ProcessKind, ProcessRef, VmKind};
use heapless::String as HString;
use rt_rtos::Rtos;

/// Whatever backs `/cards`, `/sd`, or wherever user scripts live. Reads into
/// a caller-supplied buffer since the spawner has no heap to stage a copy in.
pub trait FileProxy {
    fn read(&self, path: &str, out: &mut [u8]) -> abi::Result<usize>;
}

/// A built-in app's code, resolved ahead of time instead of going through a
/// filesystem at all (§4.9's static built-in-app table).
pub enum BuiltinSource<R: Rtos> {
    Bytecode(&'static [u8]),
    Native(NativeEntry<R>),
}

pub struct BuiltinApp<R: Rtos> {
    pub name: &'static str,
    pub vm_kind: VmKind,
    pub source: BuiltinSource<R>,
}

/// `<path>.cfg`, the longest companion-config path the spawner ever builds.
const MAX_COMPANION_PATH_LEN: usize = MAX_PATH_LEN + 4;

/// Thin name/path resolution layer over a [`ProcessTable`]. Holds no state
/// of its own beyond the built-in table and a file proxy reference.
pub struct Spawner<'a, R: Rtos, F: FileProxy> {
    file_proxy: &'a F,
    builtins: &'a [BuiltinApp<R>],
}

impl<'a, R: Rtos, F: FileProxy> Spawner<'a, R, F> {
    pub fn new(file_proxy: &'a F, builtins: &'a [BuiltinApp<R>]) -> Self {
        Spawner { file_proxy, builtins }
    }

    fn find_builtin(&self, name: &str) -> Option<&BuiltinApp<R>> {
        self.builtins.iter().find(|b| b.name == name)
    }

    /// Resolves `name` against the built-in table and spawns it. Window
    /// geometry, if any, comes from a `<name>.cfg` companion file.
    pub fn spawn_app<V: VmHost<R>>(
        &self,
        table: &'static ProcessTable<R, V>,
        name: &str,
    ) -> abi::Result<ProcessRef> {
        let app = self.find_builtin(name).ok_or_else(err::not_found)?;
        let load = match &app.source {
            BuiltinSource::Native(f) => LoadSource::Native(*f),
            BuiltinSource::Bytecode(b) => LoadSource::Bytecode(b),
        };
        let window = self.read_companion_window(name);
        let attr = SpawnAttr {
            kind: ProcessKind::SystemApp,
            vm_kind: app.vm_kind,
            name,
            load_mode: LoadMode::Bytecode,
            load,
            window,
            ..SpawnAttr::default()
        };
        table.spawn(attr)
    }

    /// Resolves a filesystem path: reads bytecode into `bytecode_scratch`
    /// (the caller owns this buffer's lifetime, typically a per-spawn stack
    /// array), picks a VM kind from the extension, and spawns it.
    pub fn spawn_path<V: VmHost<R>>(
        &self,
        table: &'static ProcessTable<R, V>,
        path: &str,
        bytecode_scratch: &mut [u8],
    ) -> abi::Result<ProcessRef> {
        let len = self.file_proxy.read(path, bytecode_scratch)?;
        let vm_kind = Self::vm_kind_for_extension(path);
        let window = self.read_companion_window(path);
        let name = Self::file_stem(path);
        let attr = SpawnAttr {
            kind: ProcessKind::UserApp,
            vm_kind,
            name,
            load_mode: LoadMode::File,
            load: LoadSource::Bytecode(&bytecode_scratch[..len]),
            window,
            ..SpawnAttr::default()
        };
        table.spawn(attr)
    }

    fn vm_kind_for_extension(path: &str) -> VmKind {
        if path.ends_with(".rb") {
            VmKind::MRuby
        } else if path.ends_with(".lua") {
            VmKind::Lua
        } else {
            VmKind::Native
        }
    }

    fn file_stem(path: &str) -> &str {
        let base = path.rsplit('/').next().unwrap_or(path);
        match base.rfind('.') {
            Some(i) => &base[..i],
            None => base,
        }
    }

    /// Reads `<path>.cfg` and parses it; any failure (missing file, bad
    /// utf-8, malformed geometry) falls back to headless rather than
    /// refusing the spawn (§4.9's companion config note).
    fn read_companion_window(&self, app_path: &str) -> WindowConfig {
        let mut cfg_path: HString<MAX_COMPANION_PATH_LEN> = HString::new();
        if cfg_path.push_str(app_path).is_err() || cfg_path.push_str(".cfg").is_err() {
            return WindowConfig::HEADLESS;
        }
        let mut buf = [0u8; 256];
        match self.file_proxy.read(cfg_path.as_str(), &mut buf) {
            Ok(len) => Self::parse_companion_config(&buf[..len]),
            Err(_) => WindowConfig::HEADLESS,
        }
    }

    /// Minimal `key=value` lines, not TOML (§4.9): `width`, `height`, `x`,
    /// `y`, `headless`. Unknown keys and malformed lines are ignored.
    fn parse_companion_config(bytes: &[u8]) -> WindowConfig {
        let text = match core::str::from_utf8(bytes) {
            Ok(t) => t,
            Err(_) => return WindowConfig::HEADLESS,
        };
        let mut cfg = WindowConfig { headless: false, width: 0, height: 0, x: 0, y: 0 };
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut parts = line.splitn(2, '=');
            let key = match parts.next() {
                Some(k) => k.trim(),
                None => continue,
            };
            let value = match parts.next() {
                Some(v) => v.trim(),
                None => continue,
            };
            match key {
                "headless" => cfg.headless = value.eq_ignore_ascii_case("true"),
                "width" => cfg.width = value.parse().unwrap_or(cfg.width),
                "height" => cfg.height = value.parse().unwrap_or(cfg.height),
                "x" => cfg.x = value.parse().unwrap_or(cfg.x),
                "y" => cfg.y = value.parse().unwrap_or(cfg.y),
                _ => {}
            }
        }
        if !cfg.is_valid() {
            return WindowConfig::HEADLESS;
        }
        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rt_rtos::sim::SimRtos;

    struct NoFiles;
    impl FileProxy for NoFiles {
        fn read(&self, _path: &str, _out: &mut [u8]) -> abi::Result<usize> {
            Err(err::not_found())
        }
    }

    struct FixedFiles {
        cfg: &'static [u8],
    }
    impl FileProxy for FixedFiles {
        fn read(&self, path: &str, out: &mut [u8]) -> abi::Result<usize> {
            if path.ends_with(".cfg") {
                out[..self.cfg.len()].copy_from_slice(self.cfg);
                Ok(self.cfg.len())
            } else {
                Err(err::not_found())
            }
        }
    }

    fn noop(_ctx: &crate::vmhost::NativeContext<'_, SimRtos>) {}

    #[test]
    fn unknown_builtin_is_not_found() {
        let files = NoFiles;
        let builtins: [BuiltinApp<SimRtos>; 1] = [BuiltinApp {
            name: "shell",
            vm_kind: VmKind::Native,
            source: BuiltinSource::Native(noop),
        }];
        let spawner = Spawner::new(&files, &builtins);
        assert!(spawner.find_builtin("nope").is_none());
    }

    #[test]
    fn companion_config_parses_geometry() {
        let window = Spawner::<SimRtos, NoFiles>::parse_companion_config(b"width=320\nheight=240\nx=10\ny=20\n");
        assert_eq!(window, WindowConfig { headless: false, width: 320, height: 240, x: 10, y: 20 });
    }

    #[test]
    fn malformed_companion_config_falls_back_to_headless() {
        let window = Spawner::<SimRtos, NoFiles>::parse_companion_config(b"width=0\nheight=0\n");
        assert_eq!(window, WindowConfig::HEADLESS);
    }

    #[test]
    fn missing_companion_config_is_headless() {
        let files = NoFiles;
        let builtins: [BuiltinApp<SimRtos>; 0] = [];
        let spawner = Spawner::new(&files, &builtins);
        assert_eq!(spawner.read_companion_window("shell"), WindowConfig::HEADLESS);
    }

    #[test]
    fn present_companion_config_is_honored() {
        let files = FixedFiles { cfg: b"width=64\nheight=48\n" };
        let builtins: [BuiltinApp<SimRtos>; 0] = [];
        let spawner = Spawner::new(&files, &builtins);
        let window = spawner.read_companion_window("paint");
        assert_eq!(window, WindowConfig { headless: false, width: 64, height: 48, x: 0, y: 0 });
    }
}
