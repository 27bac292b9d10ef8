//! `Value`를 키로 쓰는 open addressing 해시 테이블
//!
//! 2의 거듭제곱 크기 슬롯 배열을 선형 탐사하고, 75% 부하에서 늘립니다.
//! 삭제된 엔트리는 탐사 사슬을 잇는 tombstone을 남깁니다. `count`는 부하 계산을 위해
//! tombstone까지 세고 `len`은 살아 있는 엔트리만 셉니다.
//!
//! 테이블은 `Value::shallow_eq` 외에는 키를 직접 해시하거나 비교하지 않습니다.
//! 호출하는 쪽이 해시를 넘기고, VM이 필요한 비교(튜플, `__eq__`가 있는 인스턴스)는
//! [`Table::candidates`]로 후보를 받아 해결합니다.

use super::value::Value;

const TABLE_MAX_LOAD_NUM: usize = 3;
const TABLE_MAX_LOAD_DEN: usize = 4;
const TABLE_MIN_CAPACITY: usize = 8;

#[derive(Debug, Clone, Copy)]
pub struct Entry {
    pub key: Value,
    pub value: Value,
    pub hash: u32,
}

#[derive(Debug, Clone, Copy)]
enum Slot {
    Empty,
    Tombstone,
    Full(Entry),
}

/// 탐색 결과: 일치하는 엔트리 위치 또는 삽입 가능한 위치
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    Found(usize),
    Vacant(usize),
}

#[derive(Debug, Clone, Default)]
pub struct Table {
    slots: Vec<Slot>,
    /// 살아 있는 엔트리 + tombstone
    count: usize,
    live: usize,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// 살아 있는 엔트리와 tombstone의 수
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// `hash`로 탐사해 `eq`가 참인 첫 슬롯이나 첫 빈 슬롯에서 멈춥니다.
    /// 빈 자리로는 처음 만난 tombstone을 돌려주므로 다시 넣는 키가 삭제된 슬롯을 재사용합니다.
    pub fn probe(&self, hash: u32, mut eq: impl FnMut(&Entry) -> bool) -> Option<Probe> {
        if self.slots.is_empty() {
            return None;
        }
        let mask = self.slots.len() - 1;
        let mut index = hash as usize & mask;
        let mut tombstone = None;
        loop {
            match &self.slots[index] {
                Slot::Empty => return Some(Probe::Vacant(tombstone.unwrap_or(index))),
                Slot::Tombstone => {
                    if tombstone.is_none() {
                        tombstone = Some(index);
                    }
                }
                Slot::Full(entry) => {
                    if entry.hash == hash && eq(entry) {
                        return Some(Probe::Found(index));
                    }
                }
            }
            index = (index + 1) & mask;
        }
    }

    /// `hash`의 탐사 사슬에서 해시가 같은 살아 있는 엔트리들과, 새 키가 들어갈 슬롯
    pub fn candidates(&self, hash: u32) -> (Vec<usize>, Option<usize>) {
        let mut found = Vec::new();
        if self.slots.is_empty() {
            return (found, None);
        }
        let mask = self.slots.len() - 1;
        let mut index = hash as usize & mask;
        let mut tombstone = None;
        loop {
            match &self.slots[index] {
                Slot::Empty => return (found, Some(tombstone.unwrap_or(index))),
                Slot::Tombstone => {
                    if tombstone.is_none() {
                        tombstone = Some(index);
                    }
                }
                Slot::Full(entry) => {
                    if entry.hash == hash {
                        found.push(index);
                    }
                }
            }
            index = (index + 1) & mask;
        }
    }

    pub fn entry_at(&self, index: usize) -> Option<&Entry> {
        match self.slots.get(index) {
            Some(Slot::Full(entry)) => Some(entry),
            _ => None,
        }
    }

    /// 키 하나를 더 넣을 자리를 만듭니다. 이어지는 `probe`/`insert_at` 사이에는 늘어나지 않습니다.
    pub fn reserve_one(&mut self) {
        if (self.count + 1) * TABLE_MAX_LOAD_DEN > self.slots.len() * TABLE_MAX_LOAD_NUM {
            let capacity = if self.slots.len() < TABLE_MIN_CAPACITY {
                TABLE_MIN_CAPACITY
            } else {
                self.slots.len() * 2
            };
            self.adjust_capacity(capacity);
        }
    }

    /// `capacity`개 슬롯으로 다시 할당하고 살아 있는 엔트리만 다시 넣습니다.
    pub fn adjust_capacity(&mut self, capacity: usize) {
        let capacity = capacity.next_power_of_two().max(TABLE_MIN_CAPACITY);
        let old = std::mem::replace(&mut self.slots, vec![Slot::Empty; capacity]);
        self.count = 0;
        self.live = 0;
        let mask = capacity - 1;
        for slot in old {
            if let Slot::Full(entry) = slot {
                let mut index = entry.hash as usize & mask;
                while matches!(self.slots[index], Slot::Full(_)) {
                    index = (index + 1) & mask;
                }
                self.slots[index] = Slot::Full(entry);
                self.count += 1;
                self.live += 1;
            }
        }
    }

    /// 탐사 결과 위치에 저장합니다. 키가 없었으면 `true`.
    pub fn insert_at(&mut self, probe: Probe, entry: Entry) -> bool {
        match probe {
            Probe::Found(index) => {
                if let Slot::Full(existing) = &mut self.slots[index] {
                    existing.value = entry.value;
                }
                false
            }
            Probe::Vacant(index) => {
                if matches!(self.slots[index], Slot::Empty) {
                    self.count += 1;
                }
                self.live += 1;
                self.slots[index] = Slot::Full(entry);
                true
            }
        }
    }

    pub fn remove_at(&mut self, index: usize) -> Option<Entry> {
        match self.slots.get(index).copied() {
            Some(Slot::Full(entry)) => {
                self.slots[index] = Slot::Tombstone;
                self.live -= 1;
                Some(entry)
            }
            _ => None,
        }
    }

    // ========== shallow-key 편의 API ==========
    // 문자열(인터닝됨)과 숫자 키는 VM 없이 비교할 수 있습니다.

    pub fn get(&self, key: Value, hash: u32) -> Option<Value> {
        match self.probe(hash, |e| e.key.shallow_eq(&key))? {
            Probe::Found(index) => self.entry_at(index).map(|e| e.value),
            Probe::Vacant(_) => None,
        }
    }

    pub fn set(&mut self, key: Value, hash: u32, value: Value) -> bool {
        self.reserve_one();
        match self.probe(hash, |e| e.key.shallow_eq(&key)) {
            Some(probe) => self.insert_at(probe, Entry { key, value, hash }),
            None => false,
        }
    }

    pub fn delete(&mut self, key: Value, hash: u32) -> bool {
        match self.probe(hash, |e| e.key.shallow_eq(&key)) {
            Some(Probe::Found(index)) => self.remove_at(index).is_some(),
            _ => false,
        }
    }

    /// 살아 있는 엔트리를 모두 `to`에 복사합니다. 같은 키는 덮어씁니다.
    pub fn add_all(&self, to: &mut Table) {
        for entry in self.iter() {
            to.set(entry.key, entry.hash, entry.value);
        }
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.count = 0;
        self.live = 0;
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.slots.iter().filter_map(|slot| match slot {
            Slot::Full(entry) => Some(entry),
            _ => None,
        })
    }

    /// 슬롯 `from`부터의 다음 살아 있는 엔트리. 반복자는 돌려받은 인덱스 + 1부터 이어갑니다.
    pub fn next_entry(&self, from: usize) -> Option<(usize, &Entry)> {
        self.slots
            .iter()
            .enumerate()
            .skip(from)
            .find_map(|(index, slot)| match slot {
                Slot::Full(entry) => Some((index, entry)),
                _ => None,
            })
    }

    /// `keep`을 만족하지 않는 엔트리를 모두 지웁니다. 약한 테이블용.
    pub fn retain(&mut self, mut keep: impl FnMut(&Entry) -> bool) {
        for index in 0..self.slots.len() {
            if let Slot::Full(entry) = &self.slots[index] {
                if !keep(entry) {
                    self.slots[index] = Slot::Tombstone;
                    self.live -= 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int_hash(i: i64) -> u32 {
        i as u32
    }

    #[test]
    fn test_set_get_overwrite() {
        let mut table = Table::new();
        assert!(table.set(Value::Int(1), int_hash(1), Value::Int(10)));
        assert!(table.set(Value::Int(2), int_hash(2), Value::Int(20)));
        assert!(!table.set(Value::Int(1), int_hash(1), Value::Int(11)));
        assert_eq!(table.get(Value::Int(1), int_hash(1)), Some(Value::Int(11)));
        assert_eq!(table.get(Value::Int(2), int_hash(2)), Some(Value::Int(20)));
        assert_eq!(table.get(Value::Int(3), int_hash(3)), None);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_tombstone_keeps_probe_chain() {
        let mut table = Table::new();
        // 같은 해시로 충돌을 만든다
        for i in 0..3 {
            table.set(Value::Int(i), 7, Value::Int(i * 100));
        }
        assert!(table.delete(Value::Int(0), 7));
        assert_eq!(table.get(Value::Int(2), 7), Some(Value::Int(200)));
        assert_eq!(table.len(), 2);
        // tombstone은 load 계산에 남아 있다
        assert_eq!(table.count(), 3);
        // 삭제된 슬롯을 재사용
        table.set(Value::Int(5), 7, Value::Int(500));
        assert_eq!(table.count(), 3);
        assert_eq!(table.get(Value::Int(5), 7), Some(Value::Int(500)));
    }

    #[test]
    fn test_growth_preserves_entries_and_drops_tombstones() {
        let mut table = Table::new();
        for i in 0..100 {
            table.set(Value::Int(i), int_hash(i), Value::Int(i * 2));
        }
        for i in 0..50 {
            table.delete(Value::Int(i), int_hash(i));
        }
        table.adjust_capacity(table.capacity());
        assert_eq!(table.count(), 50);
        for i in 50..100 {
            assert_eq!(table.get(Value::Int(i), int_hash(i)), Some(Value::Int(i * 2)));
        }
        assert!(table.capacity().is_power_of_two());
        assert!(table.count() * 4 <= table.capacity() * 3);
    }

    #[test]
    fn test_float_and_int_keys_collide_by_value() {
        let mut table = Table::new();
        table.set(Value::Int(1), 1, Value::Bool(true));
        assert_eq!(table.get(Value::Float(1.0), 1), Some(Value::Bool(true)));
    }

    #[test]
    fn test_next_entry_walks_live_slots() {
        let mut table = Table::new();
        for i in 0..5 {
            table.set(Value::Int(i), int_hash(i), Value::None);
        }
        table.delete(Value::Int(2), int_hash(2));
        let mut seen = Vec::new();
        let mut at = 0;
        while let Some((index, entry)) = table.next_entry(at) {
            seen.push(entry.key.as_int().unwrap_or(-1));
            at = index + 1;
        }
        seen.sort();
        assert_eq!(seen, vec![0, 1, 3, 4]);
    }

    #[test]
    fn test_candidates_reports_vacancy() {
        let mut table = Table::new();
        table.set(Value::Int(1), 3, Value::None);
        table.set(Value::Int(2), 3, Value::None);
        let (found, vacancy) = table.candidates(3);
        assert_eq!(found.len(), 2);
        assert!(vacancy.is_some());
    }
}
