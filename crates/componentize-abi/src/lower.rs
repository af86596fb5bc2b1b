//! Lowering native values into flat core values and linear memory.

use crate::layout::{MAX_FLAT_PARAMS, discriminant_size};
use crate::types::{Handle, Type, TypeDefKind, TypeId};
use crate::value::{CoreValue, Value};
use crate::{AbiError, CanonicalAbi, LinearMemory};

impl CanonicalAbi<'_> {
    /// Lower `value` of type `ty` into flat core values appended to `out`.
    ///
    /// Strings and lists are copied into freshly allocated blocks of
    /// `memory`; the caller owns those allocations afterwards.
    pub fn lower_flat(
        &self,
        value: &Value,
        ty: &Type,
        memory: &mut LinearMemory,
        out: &mut Vec<CoreValue>,
    ) -> Result<(), AbiError> {
        let ty = self.arena.dealias(*ty)?;
        match (ty, value) {
            (Type::Bool, Value::Bool(b)) => out.push(CoreValue::I32(i32::from(*b))),
            (Type::U8, Value::U8(v)) => out.push(CoreValue::I32(i32::from(*v))),
            (Type::U16, Value::U16(v)) => out.push(CoreValue::I32(i32::from(*v))),
            (Type::U32, Value::U32(v)) => out.push(CoreValue::I32(*v as i32)),
            (Type::U64, Value::U64(v)) => out.push(CoreValue::I64(*v as i64)),
            (Type::S8, Value::S8(v)) => out.push(CoreValue::I32(i32::from(*v))),
            (Type::S16, Value::S16(v)) => out.push(CoreValue::I32(i32::from(*v))),
            (Type::S32, Value::S32(v)) => out.push(CoreValue::I32(*v)),
            (Type::S64, Value::S64(v)) => out.push(CoreValue::I64(*v)),
            (Type::F32, Value::F32(v)) => out.push(CoreValue::F32(*v)),
            (Type::F64, Value::F64(v)) => out.push(CoreValue::F64(*v)),
            (Type::Char, Value::Char(c)) => out.push(CoreValue::I32(u32::from(*c) as i32)),
            (Type::String, Value::String(s)) => {
                let (ptr, len) = self.store_string(s, memory)?;
                out.push(CoreValue::I32(ptr as i32));
                out.push(CoreValue::I32(len as i32));
            }
            (Type::Id(id), value) => self.lower_flat_def(id, value, memory, out)?,
            (ty, value) => return Err(self.mismatch(&ty, value)),
        }
        Ok(())
    }

    fn lower_flat_def(
        &self,
        id: TypeId,
        value: &Value,
        memory: &mut LinearMemory,
        out: &mut Vec<CoreValue>,
    ) -> Result<(), AbiError> {
        let kind = &self.arena.get(id)?.kind;
        match (kind, value) {
            (TypeDefKind::Record(r), Value::Record(fields)) => {
                for field in &r.fields {
                    let v = field_value(fields, &field.name)?;
                    self.lower_flat(v, &field.ty, memory, out)?;
                }
            }
            (TypeDefKind::Tuple(t), Value::Tuple(values)) if t.types.len() == values.len() => {
                for (ty, v) in t.types.iter().zip(values) {
                    self.lower_flat(v, ty, memory, out)?;
                }
            }
            (TypeDefKind::List(elem), Value::List(values)) => {
                let (ptr, len) = self.store_list(elem, values, memory)?;
                out.push(CoreValue::I32(ptr as i32));
                out.push(CoreValue::I32(len as i32));
            }
            (TypeDefKind::Flags(f), Value::Flags(names)) => {
                for word in flag_words(&f.flags, names)? {
                    out.push(CoreValue::I32(word as i32));
                }
            }
            (TypeDefKind::Handle(Handle::Own(_)) | TypeDefKind::Resource, Value::Own(h))
            | (TypeDefKind::Handle(Handle::Borrow(_)), Value::Borrow(h) | Value::Own(h)) => {
                out.push(CoreValue::I32(*h as i32));
            }
            (kind, value) if kind.cases().is_some() => {
                let (disc, case, payload) = self.select_case(id, kind, value)?;
                self.lower_variant_flat(id, disc, case, payload, memory, out)?;
            }
            (_, value) => return Err(self.mismatch(&Type::Id(id), value)),
        }
        Ok(())
    }

    /// Resolve which case of a variant-shaped type `value` selects.
    fn select_case<'v>(
        &self,
        id: TypeId,
        kind: &TypeDefKind,
        value: &'v Value,
    ) -> Result<(usize, Option<Type>, Option<&'v Value>), AbiError> {
        let selected = match (kind, value) {
            (TypeDefKind::Enum(e), Value::Enum(name)) => e
                .cases
                .iter()
                .position(|c| c == name)
                .map(|disc| (disc, None, None)),
            (TypeDefKind::Variant(v), Value::Variant(name, payload)) => v
                .cases
                .iter()
                .position(|c| &c.name == name)
                .and_then(|disc| v.cases.get(disc).map(|c| (disc, c.ty, payload.as_deref()))),
            (TypeDefKind::Option(_), Value::Option(None)) => Some((0, None, None)),
            (TypeDefKind::Option(t), Value::Option(Some(v))) => Some((1, Some(*t), Some(&**v))),
            (TypeDefKind::Result(r), Value::Result(Ok(p))) => Some((0, r.ok, p.as_deref())),
            (TypeDefKind::Result(r), Value::Result(Err(p))) => Some((1, r.err, p.as_deref())),
            _ => None,
        };
        selected.ok_or_else(|| self.mismatch(&Type::Id(id), value))
    }

    fn lower_variant_flat(
        &self,
        id: TypeId,
        disc: usize,
        case: Option<Type>,
        payload: Option<&Value>,
        memory: &mut LinearMemory,
        out: &mut Vec<CoreValue>,
    ) -> Result<(), AbiError> {
        let joined = self.cache.layout(self.arena, &Type::Id(id))?.flat;
        out.push(CoreValue::I32(disc as i32));
        let mut case_flat = Vec::new();
        match (case, payload) {
            (Some(ty), Some(v)) => self.lower_flat(v, &ty, memory, &mut case_flat)?,
            (None, None) => {}
            (Some(ty), None) => {
                return Err(AbiError::TypeMismatch {
                    expected: self.arena.describe(&ty),
                    got: "no payload".to_string(),
                });
            }
            (None, Some(v)) => {
                return Err(AbiError::TypeMismatch {
                    expected: "no payload".to_string(),
                    got: v.kind().to_string(),
                });
            }
        }
        for (i, slot) in joined.iter().skip(1).enumerate() {
            out.push(match case_flat.get(i) {
                Some(v) => v.widen(*slot),
                None => CoreValue::zero(*slot),
            });
        }
        Ok(())
    }

    /// Store `value` of type `ty` at `ptr` using the in-memory layout.
    pub fn store(
        &self,
        value: &Value,
        ty: &Type,
        memory: &mut LinearMemory,
        ptr: u32,
    ) -> Result<(), AbiError> {
        let ty = self.arena.dealias(*ty)?;
        self.check_alignment(&ty, ptr)?;
        match (ty, value) {
            (Type::Bool, Value::Bool(b)) => memory.store_u8(ptr, u8::from(*b)),
            (Type::U8, Value::U8(v)) => memory.store_u8(ptr, *v),
            (Type::S8, Value::S8(v)) => memory.store_u8(ptr, *v as u8),
            (Type::U16, Value::U16(v)) => memory.store_u16(ptr, *v),
            (Type::S16, Value::S16(v)) => memory.store_u16(ptr, *v as u16),
            (Type::U32, Value::U32(v)) => memory.store_u32(ptr, *v),
            (Type::S32, Value::S32(v)) => memory.store_u32(ptr, *v as u32),
            (Type::U64, Value::U64(v)) => memory.store_u64(ptr, *v),
            (Type::S64, Value::S64(v)) => memory.store_u64(ptr, *v as u64),
            (Type::F32, Value::F32(v)) => memory.store_u32(ptr, v.to_bits()),
            (Type::F64, Value::F64(v)) => memory.store_u64(ptr, v.to_bits()),
            (Type::Char, Value::Char(c)) => memory.store_u32(ptr, u32::from(*c)),
            (Type::String, Value::String(s)) => {
                let (data, len) = self.store_string(s, memory)?;
                memory.store_u32(ptr, data)?;
                memory.store_u32(ptr + 4, len)
            }
            (Type::Id(id), value) => self.store_def(id, value, memory, ptr),
            (ty, value) => Err(self.mismatch(&ty, value)),
        }
    }

    fn store_def(
        &self,
        id: TypeId,
        value: &Value,
        memory: &mut LinearMemory,
        ptr: u32,
    ) -> Result<(), AbiError> {
        let kind = &self.arena.get(id)?.kind;
        match (kind, value) {
            (TypeDefKind::Record(r), Value::Record(fields)) => {
                let types: Vec<_> = r.fields.iter().map(|f| f.ty).collect();
                let offsets = self.cache.field_offsets(self.arena, &types)?;
                for (field, offset) in r.fields.iter().zip(offsets) {
                    let v = field_value(fields, &field.name)?;
                    self.store(v, &field.ty, memory, ptr + offset as u32)?;
                }
                Ok(())
            }
            (TypeDefKind::Tuple(t), Value::Tuple(values)) if t.types.len() == values.len() => {
                let offsets = self.cache.field_offsets(self.arena, &t.types)?;
                for ((ty, v), offset) in t.types.iter().zip(values).zip(offsets) {
                    self.store(v, ty, memory, ptr + offset as u32)?;
                }
                Ok(())
            }
            (TypeDefKind::List(elem), Value::List(values)) => {
                let (data, len) = self.store_list(elem, values, memory)?;
                memory.store_u32(ptr, data)?;
                memory.store_u32(ptr + 4, len)
            }
            (TypeDefKind::Flags(f), Value::Flags(names)) => {
                let words = flag_words(&f.flags, names)?;
                let size = self.cache.layout(self.arena, &Type::Id(id))?.size;
                match (size, words.first()) {
                    (0, _) => Ok(()),
                    (1, Some(w)) => memory.store_u8(ptr, *w as u8),
                    (2, Some(w)) => memory.store_u16(ptr, *w as u16),
                    _ => {
                        for (i, w) in words.iter().enumerate() {
                            memory.store_u32(ptr + 4 * i as u32, *w)?;
                        }
                        Ok(())
                    }
                }
            }
            (TypeDefKind::Handle(Handle::Own(_)) | TypeDefKind::Resource, Value::Own(h))
            | (TypeDefKind::Handle(Handle::Borrow(_)), Value::Borrow(h) | Value::Own(h)) => {
                memory.store_u32(ptr, *h)
            }
            (kind, value) => match kind.cases() {
                Some(cases) => {
                    let (disc, case, payload) = self.select_case(id, kind, value)?;
                    store_discriminant(memory, ptr, cases.len(), disc as u32)?;
                    let offset = self.cache.payload_offset(self.arena, &cases)? as u32;
                    match (case, payload) {
                        (Some(ty), Some(v)) => self.store(v, &ty, memory, ptr + offset),
                        (None, None) => Ok(()),
                        _ => Err(self.mismatch(&Type::Id(id), value)),
                    }
                }
                None => Err(self.mismatch(&Type::Id(id), value)),
            },
        }
    }

    /// Lower a whole parameter list, spilling into a fresh allocation when it
    /// flattens to more than the maximum number of core parameters.
    pub fn lower_params(
        &self,
        types: &[Type],
        values: &[Value],
        memory: &mut LinearMemory,
    ) -> Result<Vec<CoreValue>, AbiError> {
        if types.len() != values.len() {
            return Err(AbiError::TypeMismatch {
                expected: format!("{} parameter(s)", types.len()),
                got: format!("{} value(s)", values.len()),
            });
        }
        let layout = self.cache.record_layout(self.arena, types)?;
        if layout.core_count() <= MAX_FLAT_PARAMS {
            let mut out = Vec::with_capacity(layout.core_count());
            for (ty, v) in types.iter().zip(values) {
                self.lower_flat(v, ty, memory, &mut out)?;
            }
            return Ok(out);
        }
        let ptr = memory.alloc(layout.size as u32, layout.align as u32)?;
        let offsets = self.cache.field_offsets(self.arena, types)?;
        for ((ty, v), offset) in types.iter().zip(values).zip(offsets) {
            self.store(v, ty, memory, ptr + offset as u32)?;
        }
        Ok(vec![CoreValue::I32(ptr as i32)])
    }

    fn store_string(&self, s: &str, memory: &mut LinearMemory) -> Result<(u32, u32), AbiError> {
        let len = u32::try_from(s.len()).map_err(|_| AbiError::TypeMismatch {
            expected: "string shorter than 4GiB".to_string(),
            got: format!("{} bytes", s.len()),
        })?;
        let ptr = memory.alloc(len, 1)?;
        memory.write(ptr, s.as_bytes())?;
        Ok((ptr, len))
    }

    fn store_list(
        &self,
        elem: &Type,
        values: &[Value],
        memory: &mut LinearMemory,
    ) -> Result<(u32, u32), AbiError> {
        let layout = self.cache.layout(self.arena, elem)?;
        let len = values.len() as u32;
        let ptr = memory.alloc(layout.size as u32 * len, layout.align as u32)?;
        for (i, v) in values.iter().enumerate() {
            self.store(v, elem, memory, ptr + (i * layout.size) as u32)?;
        }
        Ok((ptr, len))
    }
}

fn field_value<'v>(fields: &'v [(String, Value)], name: &str) -> Result<&'v Value, AbiError> {
    fields
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, v)| v)
        .ok_or_else(|| AbiError::TypeMismatch {
            expected: format!("record field `{name}`"),
            got: "missing field".to_string(),
        })
}

fn flag_words(declared: &[String], set: &[String]) -> Result<Vec<u32>, AbiError> {
    let mut words = vec![0u32; declared.len().div_ceil(32)];
    for name in set {
        let bit = declared
            .iter()
            .position(|f| f == name)
            .ok_or_else(|| AbiError::TypeMismatch {
                expected: format!("one of {declared:?}"),
                got: format!("flag `{name}`"),
            })?;
        if let Some(word) = words.get_mut(bit / 32) {
            *word |= 1 << (bit % 32);
        }
    }
    Ok(words)
}

pub(crate) fn store_discriminant(
    memory: &mut LinearMemory,
    ptr: u32,
    cases: usize,
    disc: u32,
) -> Result<(), AbiError> {
    match discriminant_size(cases) {
        1 => memory.store_u8(ptr, disc as u8),
        2 => memory.store_u16(ptr, disc as u16),
        _ => memory.store_u32(ptr, disc),
    }
}
