//! Lifting flat core values and linear memory back into native values.

use crate::layout::{MAX_FLAT_PARAMS, discriminant_size};
use crate::types::{Handle, Type, TypeDefKind, TypeId};
use crate::value::{CoreValue, Value};
use crate::{AbiError, CanonicalAbi, LinearMemory, MemoryBoundsError};

impl CanonicalAbi<'_> {
    /// Lift a value of type `ty` from the front of `values`.
    pub fn lift_flat<I>(
        &self,
        ty: &Type,
        values: &mut I,
        memory: &LinearMemory,
    ) -> Result<Value, AbiError>
    where
        I: Iterator<Item = CoreValue>,
    {
        let ty = self.arena.dealias(*ty)?;
        let value = match ty {
            Type::Bool => Value::Bool(self.next_i32(&ty, values)? != 0),
            Type::U8 => Value::U8(self.next_i32(&ty, values)? as u8),
            Type::U16 => Value::U16(self.next_i32(&ty, values)? as u16),
            Type::U32 => Value::U32(self.next_i32(&ty, values)? as u32),
            Type::S8 => Value::S8(self.next_i32(&ty, values)? as i8),
            Type::S16 => Value::S16(self.next_i32(&ty, values)? as i16),
            Type::S32 => Value::S32(self.next_i32(&ty, values)?),
            Type::U64 => match values.next() {
                Some(CoreValue::I64(v)) => Value::U64(v as u64),
                _ => return Err(self.missing(&ty)),
            },
            Type::S64 => match values.next() {
                Some(CoreValue::I64(v)) => Value::S64(v),
                _ => return Err(self.missing(&ty)),
            },
            Type::F32 => match values.next() {
                Some(CoreValue::F32(v)) => Value::F32(v),
                _ => return Err(self.missing(&ty)),
            },
            Type::F64 => match values.next() {
                Some(CoreValue::F64(v)) => Value::F64(v),
                _ => return Err(self.missing(&ty)),
            },
            Type::Char => {
                let raw = self.next_i32(&ty, values)? as u32;
                Value::Char(char::from_u32(raw).ok_or(AbiError::InvalidChar(raw))?)
            }
            Type::String => {
                let ptr = self.next_i32(&ty, values)? as u32;
                let len = self.next_i32(&ty, values)? as u32;
                Value::String(load_string(memory, ptr, len)?)
            }
            Type::Id(id) => self.lift_flat_def(id, values, memory)?,
        };
        Ok(value)
    }

    fn lift_flat_def<I>(
        &self,
        id: TypeId,
        values: &mut I,
        memory: &LinearMemory,
    ) -> Result<Value, AbiError>
    where
        I: Iterator<Item = CoreValue>,
    {
        let ty = Type::Id(id);
        let kind = &self.arena.get(id)?.kind;
        let value = match kind {
            TypeDefKind::Record(r) => {
                let mut fields = Vec::with_capacity(r.fields.len());
                for field in &r.fields {
                    fields.push((field.name.clone(), self.lift_flat(&field.ty, values, memory)?));
                }
                Value::Record(fields)
            }
            TypeDefKind::Tuple(t) => {
                let mut elems = Vec::with_capacity(t.types.len());
                for ty in &t.types {
                    elems.push(self.lift_flat(ty, values, memory)?);
                }
                Value::Tuple(elems)
            }
            TypeDefKind::List(elem) => {
                let ptr = self.next_i32(&ty, values)? as u32;
                let len = self.next_i32(&ty, values)? as u32;
                Value::List(self.load_list(elem, memory, ptr, len)?)
            }
            TypeDefKind::Flags(f) => {
                let mut words = Vec::new();
                for _ in 0..f.flags.len().div_ceil(32) {
                    words.push(self.next_i32(&ty, values)? as u32);
                }
                Value::Flags(flag_names(&f.flags, &words))
            }
            TypeDefKind::Handle(Handle::Own(_)) | TypeDefKind::Resource => {
                Value::Own(self.next_i32(&ty, values)? as u32)
            }
            TypeDefKind::Handle(Handle::Borrow(_)) => {
                Value::Borrow(self.next_i32(&ty, values)? as u32)
            }
            TypeDefKind::Type(t) => self.lift_flat(t, values, memory)?,
            TypeDefKind::Unknown => return Err(AbiError::UnresolvedType(id)),
            TypeDefKind::Enum(_)
            | TypeDefKind::Variant(_)
            | TypeDefKind::Option(_)
            | TypeDefKind::Result(_) => {
                let joined = self.cache.layout(self.arena, &ty)?.flat;
                let disc = self.next_i32(&ty, values)? as u32;
                let mut slots = Vec::with_capacity(joined.len().saturating_sub(1));
                for _ in 1..joined.len() {
                    slots.push(values.next().ok_or_else(|| self.missing(&ty))?);
                }
                let cases = kind.cases().unwrap_or_default();
                let case = self.case_type(&cases, disc)?;
                let payload = match case {
                    Some(case_ty) => {
                        let case_flat = self.cache.layout(self.arena, &case_ty)?.flat;
                        let narrowed: Vec<CoreValue> = slots
                            .iter()
                            .zip(case_flat)
                            .map(|(v, t)| v.narrow(t))
                            .collect();
                        let mut narrowed = narrowed.into_iter();
                        Some(Box::new(self.lift_flat(&case_ty, &mut narrowed, memory)?))
                    }
                    None => None,
                };
                build_case(kind, disc, payload)?
            }
        };
        Ok(value)
    }

    /// Load a value of type `ty` stored at `ptr`.
    pub fn load(&self, ty: &Type, memory: &LinearMemory, ptr: u32) -> Result<Value, AbiError> {
        let ty = self.arena.dealias(*ty)?;
        self.check_alignment(&ty, ptr)?;
        let value = match ty {
            Type::Bool => Value::Bool(memory.load_u8(ptr)? != 0),
            Type::U8 => Value::U8(memory.load_u8(ptr)?),
            Type::S8 => Value::S8(memory.load_u8(ptr)? as i8),
            Type::U16 => Value::U16(memory.load_u16(ptr)?),
            Type::S16 => Value::S16(memory.load_u16(ptr)? as i16),
            Type::U32 => Value::U32(memory.load_u32(ptr)?),
            Type::S32 => Value::S32(memory.load_u32(ptr)? as i32),
            Type::U64 => Value::U64(memory.load_u64(ptr)?),
            Type::S64 => Value::S64(memory.load_u64(ptr)? as i64),
            Type::F32 => Value::F32(f32::from_bits(memory.load_u32(ptr)?)),
            Type::F64 => Value::F64(f64::from_bits(memory.load_u64(ptr)?)),
            Type::Char => {
                let raw = memory.load_u32(ptr)?;
                Value::Char(char::from_u32(raw).ok_or(AbiError::InvalidChar(raw))?)
            }
            Type::String => {
                let data = memory.load_u32(ptr)?;
                let len = memory.load_u32(ptr + 4)?;
                Value::String(load_string(memory, data, len)?)
            }
            Type::Id(id) => self.load_def(id, memory, ptr)?,
        };
        Ok(value)
    }

    fn load_def(&self, id: TypeId, memory: &LinearMemory, ptr: u32) -> Result<Value, AbiError> {
        let kind = &self.arena.get(id)?.kind;
        let value = match kind {
            TypeDefKind::Record(r) => {
                let types: Vec<_> = r.fields.iter().map(|f| f.ty).collect();
                let offsets = self.cache.field_offsets(self.arena, &types)?;
                let mut fields = Vec::with_capacity(r.fields.len());
                for (field, offset) in r.fields.iter().zip(offsets) {
                    let v = self.load(&field.ty, memory, ptr + offset as u32)?;
                    fields.push((field.name.clone(), v));
                }
                Value::Record(fields)
            }
            TypeDefKind::Tuple(t) => {
                let offsets = self.cache.field_offsets(self.arena, &t.types)?;
                let mut elems = Vec::with_capacity(t.types.len());
                for (ty, offset) in t.types.iter().zip(offsets) {
                    elems.push(self.load(ty, memory, ptr + offset as u32)?);
                }
                Value::Tuple(elems)
            }
            TypeDefKind::List(elem) => {
                let data = memory.load_u32(ptr)?;
                let len = memory.load_u32(ptr + 4)?;
                Value::List(self.load_list(elem, memory, data, len)?)
            }
            TypeDefKind::Flags(f) => {
                let size = self.cache.layout(self.arena, &Type::Id(id))?.size;
                let words = match size {
                    0 => Vec::new(),
                    1 => vec![u32::from(memory.load_u8(ptr)?)],
                    2 => vec![u32::from(memory.load_u16(ptr)?)],
                    _ => {
                        let mut words = Vec::new();
                        for i in 0..(size / 4) as u32 {
                            words.push(memory.load_u32(ptr + 4 * i)?);
                        }
                        words
                    }
                };
                Value::Flags(flag_names(&f.flags, &words))
            }
            TypeDefKind::Handle(Handle::Own(_)) | TypeDefKind::Resource => {
                Value::Own(memory.load_u32(ptr)?)
            }
            TypeDefKind::Handle(Handle::Borrow(_)) => Value::Borrow(memory.load_u32(ptr)?),
            TypeDefKind::Type(t) => self.load(t, memory, ptr)?,
            TypeDefKind::Unknown => return Err(AbiError::UnresolvedType(id)),
            TypeDefKind::Enum(_)
            | TypeDefKind::Variant(_)
            | TypeDefKind::Option(_)
            | TypeDefKind::Result(_) => {
                let cases = kind.cases().unwrap_or_default();
                let disc = match discriminant_size(cases.len()) {
                    1 => u32::from(memory.load_u8(ptr)?),
                    2 => u32::from(memory.load_u16(ptr)?),
                    _ => memory.load_u32(ptr)?,
                };
                let case = self.case_type(&cases, disc)?;
                let offset = self.cache.payload_offset(self.arena, &cases)? as u32;
                let payload = match case {
                    Some(case_ty) => Some(Box::new(self.load(&case_ty, memory, ptr + offset)?)),
                    None => None,
                };
                build_case(kind, disc, payload)?
            }
        };
        Ok(value)
    }

    /// Inverse of [`CanonicalAbi::lower_params`].
    pub fn lift_params(
        &self,
        types: &[Type],
        flat: &[CoreValue],
        memory: &LinearMemory,
    ) -> Result<Vec<Value>, AbiError> {
        let layout = self.cache.record_layout(self.arena, types)?;
        if layout.core_count() <= MAX_FLAT_PARAMS {
            let mut iter = flat.iter().copied();
            let mut values = Vec::with_capacity(types.len());
            for ty in types {
                values.push(self.lift_flat(ty, &mut iter, memory)?);
            }
            return Ok(values);
        }
        let ptr = match flat.first() {
            Some(CoreValue::I32(ptr)) => *ptr as u32,
            _ => {
                return Err(AbiError::MissingCoreValue(
                    "parameter area pointer".to_string(),
                ));
            }
        };
        memory.check_bounds(ptr, layout.size as u64)?;
        let offsets = self.cache.field_offsets(self.arena, types)?;
        let mut values = Vec::with_capacity(types.len());
        for (ty, offset) in types.iter().zip(offsets) {
            values.push(self.load(ty, memory, ptr + offset as u32)?);
        }
        Ok(values)
    }

    fn load_list(
        &self,
        elem: &Type,
        memory: &LinearMemory,
        ptr: u32,
        len: u32,
    ) -> Result<Vec<Value>, AbiError> {
        let layout = self.cache.layout(self.arena, elem)?;
        if len > 0 && ptr % layout.align as u32 != 0 {
            return Err(AbiError::Misaligned {
                ptr,
                align: layout.align as u32,
            });
        }
        let size = layout.size as u64;
        memory.check_bounds(ptr, u64::from(len) * size)?;
        // `len` comes from the guest; never reserve more elements than the
        // checked range can hold.
        let fits = memory.size().checked_div(size).unwrap_or(0);
        let mut values = Vec::with_capacity(u64::from(len).min(fits) as usize);
        let mut offset = u64::from(ptr);
        for _ in 0..len {
            let at = u32::try_from(offset).map_err(|_| MemoryBoundsError {
                ptr,
                len: u64::from(len) * size,
                memory_size: memory.size(),
            })?;
            values.push(self.load(elem, memory, at)?);
            offset += size;
        }
        Ok(values)
    }

    fn case_type(&self, cases: &[Option<Type>], disc: u32) -> Result<Option<Type>, AbiError> {
        cases
            .get(disc as usize)
            .copied()
            .ok_or(AbiError::InvalidDiscriminant {
                discriminant: disc,
                num_cases: cases.len(),
            })
    }

    fn next_i32<I>(&self, ty: &Type, values: &mut I) -> Result<i32, AbiError>
    where
        I: Iterator<Item = CoreValue>,
    {
        match values.next() {
            Some(CoreValue::I32(v)) => Ok(v),
            _ => Err(self.missing(ty)),
        }
    }

    fn missing(&self, ty: &Type) -> AbiError {
        AbiError::MissingCoreValue(self.arena.describe(ty))
    }
}

fn load_string(memory: &LinearMemory, ptr: u32, len: u32) -> Result<String, AbiError> {
    let bytes = memory.read(ptr, len)?;
    String::from_utf8(bytes.to_vec()).map_err(|_| AbiError::InvalidUtf8)
}

fn flag_names(declared: &[String], words: &[u32]) -> Vec<String> {
    declared
        .iter()
        .enumerate()
        .filter(|(bit, _)| {
            words
                .get(bit / 32)
                .is_some_and(|word| word & (1 << (bit % 32)) != 0)
        })
        .map(|(_, name)| name.clone())
        .collect()
}

fn build_case(kind: &TypeDefKind, disc: u32, payload: Option<Box<Value>>) -> Result<Value, AbiError> {
    let invalid = |num_cases| AbiError::InvalidDiscriminant {
        discriminant: disc,
        num_cases,
    };
    Ok(match kind {
        TypeDefKind::Enum(e) => Value::Enum(
            e.cases
                .get(disc as usize)
                .cloned()
                .ok_or_else(|| invalid(e.cases.len()))?,
        ),
        TypeDefKind::Variant(v) => {
            let case = v.cases.get(disc as usize).ok_or_else(|| invalid(v.cases.len()))?;
            Value::Variant(case.name.clone(), payload)
        }
        TypeDefKind::Option(_) => Value::Option(payload),
        TypeDefKind::Result(_) if disc == 0 => Value::Result(Ok(payload)),
        TypeDefKind::Result(_) => Value::Result(Err(payload)),
        _ => return Err(invalid(0)),
    })
}
