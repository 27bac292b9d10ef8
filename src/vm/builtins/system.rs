//! `kuroko` 시스템 모듈: 모듈 검색 경로, 명령행 인자, 버전

use super::native_module;
use crate::vm::machine::Vm;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub(super) fn register(vm: &mut Vm) {
    let system = native_module(vm, "kuroko");
    vm.system = system;

    let paths: Vec<String> = vm
        .config
        .module_paths
        .iter()
        .map(|p| p.to_string_lossy().into_owned())
        .collect();
    let items = paths.iter().map(|p| vm.new_string(p)).collect();
    let list = vm.new_list(items);
    vm.attach(system, "module_paths", list);

    let version = vm.new_string(VERSION);
    vm.attach(system, "version", version);

    let argv = vm.argv.clone();
    set_argv(vm, &argv);
}

/// `kuroko.argv`를 바꿉니다. 첫 원소는 스크립트 경로입니다.
pub fn set_argv(vm: &mut Vm, argv: &[String]) {
    vm.argv = argv.to_vec();
    let items = argv.iter().map(|a| vm.new_string(a)).collect();
    let list = vm.new_list(items);
    let system = vm.system;
    vm.attach(system, "argv", list);
}

/// `kuroko.module_paths` 앞쪽에 경로를 추가합니다 (`-M`).
pub fn add_module_path(vm: &mut Vm, path: &str) {
    let key = vm.intern("module_paths");
    let Some(list) = vm.get_field(vm.system, key).and_then(|v| v.as_object()) else { return };
    let entry = vm.new_string(path);
    if let crate::vm::object::ObjKind::List(items) = vm.heap.kind_mut(list) {
        items.insert(0, entry);
    }
    vm.config.module_paths.insert(0, path.into());
}
