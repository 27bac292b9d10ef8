//! 속성 조회와 메서드 바인딩
//!
//! 조회 순서:
//! 1. 인스턴스 필드
//! 2. 클래스 객체라면 자기 base chain (인스턴스용 동적 프로퍼티는 건너뜀)
//! 3. 값의 클래스 chain: 찾은 값은 `bind_found`로 바인딩
//! 4. `__getattr__`

use super::exceptions::ExcKind;
use super::{Vm, VmResult};
use crate::vm::object::{BoundMethodObj, ObjKind};
use crate::vm::type_def::{Dunder, ObjFlags};
use crate::vm::value::{ObjRef, Value};

impl Vm {
    pub fn get_attribute(&mut self, obj: Value, name: ObjRef) -> VmResult<Value> {
        match self.try_get_attribute(obj, name)? {
            Some(v) => Ok(v),
            None => Err(self.no_attribute(obj, name)),
        }
    }

    /// 속성이 없으면 `None` (`hasattr`, `getattr(o, n, default)`용)
    pub fn try_get_attribute(&mut self, obj: Value, name: ObjRef) -> VmResult<Option<Value>> {
        if let Some(r) = obj.as_object() {
            match self.heap.kind(r) {
                ObjKind::Instance(instance) => {
                    if let Some(v) = self.table_get(&instance.fields, name) {
                        return Ok(Some(v));
                    }
                }
                ObjKind::Class(_) => {
                    if let Some(v) = self.class_lookup(r, name) {
                        let instance_only = v
                            .as_object()
                            .is_some_and(|m| self.heap.flags(m).contains(ObjFlags::DYNAMIC_PROPERTY));
                        if !instance_only {
                            return self.bind_class_attribute(r, v).map(Some);
                        }
                    }
                }
                _ => {}
            }
        }

        let class = self.type_of(obj);
        if let Some(v) = self.class_lookup(class, name) {
            return self.bind_found(obj, v).map(Some);
        }
        if let Some(getattr) = self.class_slot(class, Dunder::GetAttr) {
            return self.call_callable(getattr, &[obj, Value::Object(name)]).map(Some);
        }
        Ok(None)
    }

    fn no_attribute(&mut self, obj: Value, name: ObjRef) -> super::VmError {
        let type_name = if self.is_class(obj) {
            obj.as_object().map(|c| self.class_name(c)).unwrap_or_default()
        } else {
            self.type_name(obj)
        };
        let text = self.heap.str(name).unwrap_or("?").to_string();
        self.runtime_error(
            ExcKind::AttributeError,
            format!("'{}' object has no attribute '{}'", type_name, text),
        )
    }

    /// 클래스에서 직접 꺼낸 값: classmethod만 클래스에 바인딩
    fn bind_class_attribute(&mut self, class: ObjRef, v: Value) -> VmResult<Value> {
        match v.as_object() {
            Some(m) if self.heap.flags(m).contains(ObjFlags::CLASS_METHOD) => Ok(self.bind(Value::Object(class), v)),
            _ => Ok(v),
        }
    }

    /// 클래스 chain에서 찾은 값을 `receiver`에 맞게 바인딩합니다.
    pub(super) fn bind_found(&mut self, receiver: Value, v: Value) -> VmResult<Value> {
        let Some(m) = v.as_object() else { return Ok(v) };
        let flags = self.heap.flags(m);
        match self.heap.kind(m) {
            ObjKind::Native(native) if flags.contains(ObjFlags::DYNAMIC_PROPERTY) => {
                let function = native.function;
                function(self, &[receiver], None)
            }
            ObjKind::Property(property) => {
                let getter = property.getter;
                self.call_callable(getter, &[receiver])
            }
            ObjKind::Closure(_) | ObjKind::Native(_) => {
                if flags.contains(ObjFlags::STATIC_METHOD) {
                    Ok(v)
                } else if flags.contains(ObjFlags::CLASS_METHOD) {
                    let class = if self.is_class(receiver) {
                        receiver
                    } else {
                        Value::Object(self.type_of(receiver))
                    };
                    Ok(self.bind(class, v))
                } else {
                    Ok(self.bind(receiver, v))
                }
            }
            _ => Ok(v),
        }
    }

    pub fn bind(&mut self, receiver: Value, method: Value) -> Value {
        Value::Object(self.heap.alloc(ObjKind::BoundMethod(BoundMethodObj { receiver, method })))
    }

    pub fn set_attribute(&mut self, obj: Value, name: ObjRef, value: Value) -> VmResult<()> {
        if let Some(r) = obj.as_object() {
            match self.heap.kind(r) {
                ObjKind::Instance(_) => {
                    self.set_field(r, name, value);
                    return Ok(());
                }
                ObjKind::Class(_) => {
                    self.set_method(r, name, value);
                    self.refinalize_tree(r);
                    return Ok(());
                }
                _ => {}
            }
        }
        Err(self.no_attribute(obj, name))
    }

    pub fn del_attribute(&mut self, obj: Value, name: ObjRef) -> VmResult<()> {
        let hash = self.string_hash(name);
        let removed = match obj.as_object() {
            Some(r) => match self.heap.kind_mut(r) {
                ObjKind::Instance(instance) => instance.fields.delete(Value::Object(name), hash),
                ObjKind::Class(class) => class.methods.delete(Value::Object(name), hash),
                _ => false,
            },
            None => false,
        };
        if !removed {
            return Err(self.no_attribute(obj, name));
        }
        if let Some(r) = obj.as_object().filter(|_| self.is_class(obj)) {
            self.refinalize_tree(r);
        }
        Ok(())
    }

    /// `super().name`: 현재 메서드가 정의된 클래스의 base부터 찾습니다.
    pub(super) fn get_super(&mut self, receiver: Value, name: ObjRef) -> VmResult<Value> {
        let owner = self.ts.frames.last().and_then(|f| match self.heap.kind(f.closure) {
            ObjKind::Closure(closure) => closure.owner_class,
            _ => None,
        });
        let Some(owner) = owner else {
            return Err(self.runtime_error(ExcKind::TypeError, "super() used outside of a method"));
        };
        let found = self.class_base(owner).and_then(|base| self.class_lookup(base, name));
        match found {
            Some(v) => self.bind_found(receiver, v),
            None => {
                let text = self.heap.str(name).unwrap_or("?").to_string();
                Err(self.runtime_error(
                    ExcKind::AttributeError,
                    format!("'super' object has no attribute '{}'", text),
                ))
            }
        }
    }
}
