//! # 힙과 가비지 컬렉터
//!
//! 객체는 아레나(`Vec<Option<HeapObject>>`)에 저장되고 `ObjRef` 인덱스로 참조됩니다.
//! 해제된 슬롯은 free list로 재사용됩니다.
//!
//! 수집은 tri-color mark-sweep입니다:
//! 1. VM이 루트를 `mark_value`/`mark_object`로 회색으로 만들고
//! 2. `trace_references`가 회색 worklist를 비우며 자식들을 표시하고
//! 3. `remove_white_strings`가 인터닝 테이블(약한 참조)에서 죽은 문자열을 지우고
//! 4. `sweep`이 표시되지 않은 객체를 해제하고 살아남은 객체의 mark 비트를 지웁니다.
//!
//! 할당은 절대 수집을 일으키지 않습니다. VM이 명령 사이의 safe point에서
//! `should_collect`를 확인합니다.

use std::ops::{Index, IndexMut};

use super::object::{HeapObject, ObjKind, StrObj, hash_str};
use super::table::{Entry, Probe, Table};
use super::type_def::ObjFlags;
use super::value::{ObjRef, Value};

/// `next_gc`의 하한
pub const DEFAULT_GC_FLOOR: usize = 1024 * 1024;

#[derive(Debug)]
pub struct Heap {
    objects: Vec<Option<HeapObject>>,
    free: Vec<u32>,
    pub bytes_allocated: usize,
    pub next_gc: usize,
    gray: Vec<ObjRef>,
    paused: u32,
    pub stress: bool,
    floor: usize,
    /// 인터닝 테이블. 키가 문자열, 값은 None. 약한 참조.
    strings: Table,
    pub collections: usize,
    allocations_since_gc: usize,
    scratch: Vec<Value>,
}

/// 한 번의 수집 결과
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollectStats {
    pub freed: usize,
    pub bytes_before: usize,
    pub bytes_after: usize,
}

impl Default for Heap {
    fn default() -> Self {
        Self::new(DEFAULT_GC_FLOOR)
    }
}

impl Heap {
    pub fn new(floor: usize) -> Self {
        Self {
            objects: Vec::with_capacity(1024),
            free: Vec::new(),
            bytes_allocated: 0,
            next_gc: floor,
            gray: Vec::new(),
            paused: 0,
            stress: false,
            floor,
            strings: Table::new(),
            collections: 0,
            allocations_since_gc: 0,
            scratch: Vec::new(),
        }
    }

    // ========== 할당 ==========

    pub fn alloc(&mut self, kind: ObjKind) -> ObjRef {
        self.alloc_with_flags(kind, ObjFlags::empty())
    }

    pub fn alloc_with_flags(&mut self, kind: ObjKind, flags: ObjFlags) -> ObjRef {
        let size = kind.size_hint();
        self.bytes_allocated += size;
        self.allocations_since_gc += 1;
        let object = HeapObject {
            flags,
            size: size as u32,
            kind,
        };
        match self.free.pop() {
            Some(index) => {
                self.objects[index as usize] = Some(object);
                ObjRef::new(index as usize)
            }
            None => {
                self.objects.push(Some(object));
                ObjRef::new(self.objects.len() - 1)
            }
        }
    }

    /// 내용이 같은 문자열은 항상 같은 객체입니다.
    pub fn intern(&mut self, s: &str) -> ObjRef {
        let hash = hash_str(s);
        self.strings.reserve_one();
        let objects = &self.objects;
        let probe = self.strings.probe(hash, |entry| {
            entry
                .key
                .as_object()
                .and_then(|r| objects.get(r.index()).and_then(|o| o.as_ref()))
                .is_some_and(|o| matches!(&o.kind, ObjKind::String(existing) if &*existing.chars == s))
        });
        match probe {
            Some(Probe::Found(index)) => match self.strings.entry_at(index).and_then(|e| e.key.as_object()) {
                Some(existing) => existing,
                None => self.alloc_string(s, hash),
            },
            Some(vacant @ Probe::Vacant(_)) => {
                let r = self.alloc(ObjKind::String(StrObj::new(s)));
                self.strings.insert_at(
                    vacant,
                    Entry {
                        key: Value::Object(r),
                        value: Value::None,
                        hash,
                    },
                );
                r
            }
            None => self.alloc_string(s, hash),
        }
    }

    fn alloc_string(&mut self, s: &str, hash: u32) -> ObjRef {
        let r = self.alloc(ObjKind::String(StrObj::new(s)));
        self.strings.set(Value::Object(r), hash, Value::None);
        r
    }

    /// 할당 없이 인터닝된 문자열을 찾습니다.
    pub fn find_interned(&self, s: &str) -> Option<ObjRef> {
        let objects = &self.objects;
        let probe = self.strings.probe(hash_str(s), |entry| {
            entry
                .key
                .as_object()
                .and_then(|r| objects.get(r.index()).and_then(|o| o.as_ref()))
                .is_some_and(|o| matches!(&o.kind, ObjKind::String(existing) if &*existing.chars == s))
        });
        match probe {
            Some(Probe::Found(index)) => self.strings.entry_at(index).and_then(|e| e.key.as_object()),
            _ => None,
        }
    }

    pub fn interned_count(&self) -> usize {
        self.strings.len()
    }

    // ========== 접근 ==========

    pub fn get(&self, r: ObjRef) -> Option<&HeapObject> {
        self.objects.get(r.index()).and_then(|o| o.as_ref())
    }

    pub fn get_mut(&mut self, r: ObjRef) -> Option<&mut HeapObject> {
        self.objects.get_mut(r.index()).and_then(|o| o.as_mut())
    }

    pub fn kind(&self, r: ObjRef) -> &ObjKind {
        &self[r].kind
    }

    pub fn kind_mut(&mut self, r: ObjRef) -> &mut ObjKind {
        &mut self[r].kind
    }

    pub fn flags(&self, r: ObjRef) -> ObjFlags {
        self[r].flags
    }

    pub fn set_flag(&mut self, r: ObjRef, flag: ObjFlags, on: bool) {
        self[r].flags.set(flag, on);
    }

    pub fn str(&self, r: ObjRef) -> Option<&str> {
        match self.get(r).map(|o| &o.kind) {
            Some(ObjKind::String(s)) => Some(&s.chars),
            _ => None,
        }
    }

    pub fn value_str(&self, v: Value) -> Option<&str> {
        v.as_object().and_then(|r| self.str(r))
    }

    pub fn live_objects(&self) -> usize {
        self.objects.iter().filter(|o| o.is_some()).count()
    }

    pub fn is_live(&self, r: ObjRef) -> bool {
        self.get(r).is_some()
    }

    // ========== pause / stress ==========

    /// 중첩 가능. `resume`과 짝을 이뤄야 합니다.
    pub fn pause(&mut self) {
        self.paused += 1;
    }

    pub fn resume(&mut self) {
        self.paused = self.paused.saturating_sub(1);
    }

    pub fn is_paused(&self) -> bool {
        self.paused > 0
    }

    pub fn should_collect(&self) -> bool {
        if self.paused > 0 {
            return false;
        }
        if self.stress {
            self.allocations_since_gc > 0
        } else {
            self.bytes_allocated > self.next_gc
        }
    }

    // ========== mark ==========

    pub fn mark_value(&mut self, v: Value) {
        if let Value::Object(r) = v {
            self.mark_object(r);
        }
    }

    pub fn mark_object(&mut self, r: ObjRef) {
        if let Some(object) = self.get_mut(r) {
            if object.flags.contains(ObjFlags::IS_MARKED) {
                return;
            }
            object.flags.insert(ObjFlags::IS_MARKED);
            self.gray.push(r);
        }
    }

    pub fn is_marked(&self, r: ObjRef) -> bool {
        self.get(r).is_some_and(|o| o.flags.contains(ObjFlags::IS_MARKED))
    }

    /// 회색 worklist를 비웁니다.
    pub fn trace_references(&mut self) {
        let mut children = std::mem::take(&mut self.scratch);
        while let Some(r) = self.gray.pop() {
            children.clear();
            if let Some(object) = self.get(r) {
                object.kind.trace(&mut children);
            }
            for child in children.drain(..) {
                self.mark_value(child);
            }
        }
        self.scratch = children;
    }

    /// 인터닝 테이블과 클래스의 subclass 집합에서 죽은 키를 제거합니다.
    pub fn remove_white_strings(&mut self) {
        let objects = &self.objects;
        let marked = |v: Value| {
            v.as_object()
                .and_then(|r| objects.get(r.index()).and_then(|o| o.as_ref()))
                .is_some_and(|o| o.flags.contains(ObjFlags::IS_MARKED))
        };
        self.strings.retain(|e| marked(e.key));

        for index in 0..self.objects.len() {
            let mut subclasses = match self.objects[index].as_mut().map(|o| &mut o.kind) {
                Some(ObjKind::Class(class)) if !class.subclasses.is_empty() => std::mem::take(&mut class.subclasses),
                _ => continue,
            };
            let objects = &self.objects;
            subclasses.retain(|e| {
                e.key
                    .as_object()
                    .and_then(|r| objects.get(r.index()).and_then(|o| o.as_ref()))
                    .is_some_and(|o| o.flags.contains(ObjFlags::IS_MARKED))
            });
            if let Some(ObjKind::Class(class)) = self.objects[index].as_mut().map(|o| &mut o.kind) {
                class.subclasses = subclasses;
            }
        }
    }

    /// 표시되지 않은 객체를 해제하고 `next_gc`를 다시 계산합니다.
    pub fn sweep(&mut self) -> CollectStats {
        let bytes_before = self.bytes_allocated;
        let mut freed = 0;
        let mut live_bytes = 0;
        for (index, slot) in self.objects.iter_mut().enumerate() {
            let Some(object) = slot else { continue };
            if object.flags.contains(ObjFlags::IS_MARKED) {
                object.flags.remove(ObjFlags::IS_MARKED);
                // 리스트 등은 할당 이후 자랄 수 있으므로 크기를 다시 잽니다
                let size = object.kind.size_hint();
                object.size = size as u32;
                live_bytes += size;
            } else {
                *slot = None;
                self.free.push(index as u32);
                freed += 1;
            }
        }
        self.bytes_allocated = live_bytes;
        self.next_gc = (live_bytes * 2).max(self.floor);
        self.collections += 1;
        self.allocations_since_gc = 0;
        CollectStats {
            freed,
            bytes_before,
            bytes_after: live_bytes,
        }
    }

    /// 모든 객체를 버립니다 (VM 해제).
    pub fn clear(&mut self) {
        self.objects.clear();
        self.free.clear();
        self.gray.clear();
        self.strings.clear();
        self.bytes_allocated = 0;
        self.next_gc = self.floor;
        self.allocations_since_gc = 0;
    }
}

// ========== 인덱싱 ==========
//
// `heap[r]`(그리고 그 위의 `kind`, `kind_mut`, `flags`)는 루팅 단언입니다. VM이 들고 있는
// `ObjRef`는 모두 루트(스택, scratch, 프레임, 모듈 캐시 등)에서 닿을 수 있어야 하므로
// 해제된 슬롯에 닿는 것은 스크립트 오류가 아니라 VM 내부의 루팅 버그입니다. 그런
// 경우에는 재사용된 슬롯의 다른 객체를 조용히 읽는 대신 즉시 panic합니다.
// 살아 있는지 확실하지 않은 참조는 `get`/`get_mut`/`is_live`로 확인합니다.

impl Index<ObjRef> for Heap {
    type Output = HeapObject;

    fn index(&self, r: ObjRef) -> &HeapObject {
        match self.objects.get(r.index()) {
            Some(Some(object)) => object,
            _ => panic!("use of freed object {:?}", r),
        }
    }
}

impl IndexMut<ObjRef> for Heap {
    fn index_mut(&mut self, r: ObjRef) -> &mut HeapObject {
        match self.objects.get_mut(r.index()) {
            Some(Some(object)) => object,
            _ => panic!("use of freed object {:?}", r),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::object::ObjKind;

    #[test]
    fn test_intern_returns_same_ref() {
        let mut heap = Heap::default();
        let a = heap.intern("hello");
        let b = heap.intern("hello");
        let c = heap.intern("world");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(heap.str(a), Some("hello"));
        assert_eq!(heap.interned_count(), 2);
        assert_eq!(heap.find_interned("hello"), Some(a));
        assert_eq!(heap.find_interned("missing"), None);
    }

    #[test]
    fn test_unreachable_objects_are_freed() {
        let mut heap = Heap::default();
        let keep = heap.alloc(ObjKind::List(vec![]));
        let child = heap.intern("child");
        if let ObjKind::List(items) = heap.kind_mut(keep) {
            items.push(Value::Object(child));
        }
        let garbage = heap.alloc(ObjKind::List(vec![Value::Int(1)]));

        heap.mark_object(keep);
        heap.trace_references();
        heap.remove_white_strings();
        let stats = heap.sweep();

        assert_eq!(stats.freed, 1);
        assert!(heap.is_live(keep));
        assert!(heap.is_live(child));
        assert!(!heap.is_live(garbage));
        // 살아남은 객체는 mark 비트가 지워짐
        assert!(!heap.is_marked(keep));
        assert!(!heap.is_marked(child));
    }

    #[test]
    fn test_cycles_are_collected() {
        let mut heap = Heap::default();
        let a = heap.alloc(ObjKind::List(vec![]));
        let b = heap.alloc(ObjKind::List(vec![Value::Object(a)]));
        if let ObjKind::List(items) = heap.kind_mut(a) {
            items.push(Value::Object(b));
        }
        heap.trace_references();
        heap.remove_white_strings();
        let stats = heap.sweep();
        assert_eq!(stats.freed, 2);
        assert_eq!(heap.live_objects(), 0);
    }

    #[test]
    fn test_interning_is_weak() {
        let mut heap = Heap::default();
        let dead = heap.intern("temporary");
        heap.trace_references();
        heap.remove_white_strings();
        heap.sweep();
        assert!(!heap.is_live(dead));
        assert_eq!(heap.interned_count(), 0);
        // 다시 인터닝하면 새 객체
        let again = heap.intern("temporary");
        assert_eq!(heap.str(again), Some("temporary"));
    }

    #[test]
    #[should_panic(expected = "use of freed object")]
    fn test_freed_object_access_is_a_rooting_assertion() {
        let mut heap = Heap::default();
        let lost = heap.alloc(ObjKind::List(vec![]));
        heap.sweep();
        assert!(heap.get(lost).is_none());
        let _ = heap.kind(lost);
    }

    #[test]
    fn test_free_slots_are_reused() {
        let mut heap = Heap::default();
        let a = heap.alloc(ObjKind::List(vec![]));
        heap.sweep();
        let b = heap.alloc(ObjKind::List(vec![]));
        assert_eq!(a, b);
    }

    #[test]
    fn test_pause_and_stress() {
        let mut heap = Heap::default();
        heap.stress = true;
        assert!(!heap.should_collect());
        heap.alloc(ObjKind::List(vec![]));
        assert!(heap.should_collect());
        heap.pause();
        heap.pause();
        assert!(!heap.should_collect());
        heap.resume();
        assert!(!heap.should_collect());
        heap.resume();
        assert!(heap.should_collect());
    }

    #[test]
    fn test_next_gc_has_floor() {
        let mut heap = Heap::new(4096);
        heap.alloc(ObjKind::List(vec![]));
        heap.sweep();
        assert_eq!(heap.next_gc, 4096);
    }
}
