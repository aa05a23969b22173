use crate::error::VmError;
use crate::jtype::AllocationType;
use crate::keys::{ClassId, Symbol};
use crate::vm::Value;
use lasso::ThreadedRodeo;
use num_enum::TryFromPrimitive;
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::sync::Arc;

pub mod gc;
pub mod method_area;

/// Chunk-start offset into the heap region. Offset 0 is never a chunk, so it
/// doubles as the null reference in object fields and array elements.
pub type HeapRef = usize;

pub const NULL_REF: HeapRef = 0;

/// Chunk granularity and payload alignment.
const ALIGN: usize = 8;
/// Packed header word plus padding so payloads stay 8-aligned.
const HEADER_SIZE: usize = 8;
/// Header + free-list links + room for the trailing back-pointer.
pub const MIN_CHUNK: usize = 24;
/// First chunk offset; the first word of the region is reserved so that no
/// chunk ever sits at offset 0.
const FIRST_CHUNK: usize = ALIGN;

const SIZE_MASK: u32 = 0x00FF_FFFF;
const TYPE_SHIFT: u32 = 24;
const TYPE_MASK: u32 = 0xF;
const COLOR_SHIFT: u32 = 28;
const COLOR_MASK: u32 = 0x3;
const PREV_FREE_BIT: u32 = 1 << 30;
const IN_USE_BIT: u32 = 1 << 31;

/// What a chunk holds, from the GC's point of view. Everything up to and
/// including `WeakRef` is a scannable object allocation; `Data` is raw bytes
/// with no embedded references; `Static` has external lifetime and the GC
/// never looks at it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum AllocType {
    Object = 0,
    ArrayPrimitive = 1,
    ArrayObject = 2,
    /// Character storage owned by the intern pool; array-shaped, no children.
    String = 3,
    WeakRef = 4,
    Data = 5,
    Static = 6,
}

impl AllocType {
    pub fn is_scannable(self) -> bool {
        (self as u8) <= (AllocType::WeakRef as u8)
    }

    pub fn is_array_shaped(self) -> bool {
        matches!(
            self,
            AllocType::ArrayPrimitive | AllocType::ArrayObject | AllocType::String
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum GcColor {
    White = 0,
    Grey = 1,
    Black = 2,
}

/// Link-time facts the heap needs about java/lang/String to build and read
/// string objects directly.
pub struct StringSupport {
    pub string_class_id: ClassId,
    pub char_array_class_id: ClassId,
    pub instance_size: usize,
    /// Payload offset of the `value` field.
    pub value_offset: usize,
}

pub struct Heap {
    base: *mut u8,
    capacity: usize,
    /// Sum of the sizes of all free chunks, headers included.
    heap_free: usize,
    /// Offset of the first free chunk, 0 when the list is empty.
    free_head: u32,
    /// Java intern pool: UTF symbol -> String object.
    string_pool: HashMap<Symbol, HeapRef>,
    interner: Arc<ThreadedRodeo>,
    string_support: OnceCell<StringSupport>,
}

// The raw pointer is confined to the single VM thread; Heap is only Send so
// the VirtualMachine can be moved across threads before it starts.
unsafe impl Send for Heap {}

impl Heap {
    pub const OBJ_FIELDS_OFFSET: usize = 8;
    pub const ARRAY_LENGTH_OFFSET: usize = 4;
    pub const ARRAY_KIND_OFFSET: usize = 8;
    pub const ARRAY_ELEMENTS_OFFSET: usize = 16;

    pub fn new(capacity: usize, interner: Arc<ThreadedRodeo>) -> Result<Self, VmError> {
        let capacity = capacity & !(ALIGN - 1);
        if capacity <= FIRST_CHUNK + MIN_CHUNK {
            return Err(VmError::Internal("heap capacity too small".to_string()));
        }
        let base = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                capacity,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANON,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(VmError::Internal("mmap failed".to_string()));
        }

        let mut heap = Heap {
            base: base as *mut u8,
            capacity,
            heap_free: 0,
            free_head: 0,
            string_pool: HashMap::new(),
            interner,
            string_support: OnceCell::new(),
        };

        let initial = capacity - FIRST_CHUNK;
        heap.write_header(FIRST_CHUNK, initial, AllocType::Data, GcColor::White, false, false);
        heap.write_tail_backptr(FIRST_CHUNK, initial);
        heap.set_free_links(FIRST_CHUNK, 0, 0);
        heap.free_head = FIRST_CHUNK as u32;
        heap.heap_free = initial;
        Ok(heap)
    }

    pub fn set_string_support(&self, support: StringSupport) {
        self.string_support
            .set(support)
            .ok()
            .expect("string support already wired");
    }

    fn string_support(&self) -> Result<&StringSupport, VmError> {
        self.string_support
            .get()
            .ok_or_else(|| VmError::Internal("string support not wired yet".to_string()))
    }

    /// Total bytes the allocator manages (reserved word excluded).
    pub fn managed_capacity(&self) -> usize {
        self.capacity - FIRST_CHUNK
    }

    pub fn free_bytes(&self) -> usize {
        self.heap_free
    }

    /// Largest single user allocation that can currently be attempted,
    /// assuming a fully coalesced heap.
    pub fn largest_possible_alloc(&self) -> usize {
        self.heap_free.saturating_sub(HEADER_SIZE)
    }

    // -- raw header access ---------------------------------------------------

    fn word_at(&self, offset: usize) -> u32 {
        debug_assert!(offset + 4 <= self.capacity);
        unsafe { *(self.base.add(offset) as *const u32) }
    }

    fn set_word_at(&mut self, offset: usize, value: u32) {
        debug_assert!(offset + 4 <= self.capacity);
        unsafe { *(self.base.add(offset) as *mut u32) = value }
    }

    fn header(&self, chunk: HeapRef) -> u32 {
        self.word_at(chunk)
    }

    fn chunk_size(&self, chunk: HeapRef) -> usize {
        (self.header(chunk) & SIZE_MASK) as usize
    }

    pub fn alloc_type(&self, chunk: HeapRef) -> Result<AllocType, VmError> {
        let raw = ((self.header(chunk) >> TYPE_SHIFT) & TYPE_MASK) as u8;
        AllocType::try_from(raw).map_err(|_| VmError::HeapCorrupt("bad alloc type in header"))
    }

    pub fn color(&self, chunk: HeapRef) -> GcColor {
        match (self.header(chunk) >> COLOR_SHIFT) & COLOR_MASK {
            0 => GcColor::White,
            1 => GcColor::Grey,
            _ => GcColor::Black,
        }
    }

    pub fn set_color(&mut self, chunk: HeapRef, color: GcColor) {
        let header = self.header(chunk);
        let cleared = header & !(COLOR_MASK << COLOR_SHIFT);
        self.set_word_at(chunk, cleared | ((color as u32) << COLOR_SHIFT));
    }

    fn is_in_use(&self, chunk: HeapRef) -> bool {
        self.header(chunk) & IN_USE_BIT != 0
    }

    fn is_prev_free(&self, chunk: HeapRef) -> bool {
        self.header(chunk) & PREV_FREE_BIT != 0
    }

    fn set_prev_free(&mut self, chunk: HeapRef, prev_free: bool) {
        let header = self.header(chunk);
        let updated = if prev_free {
            header | PREV_FREE_BIT
        } else {
            header & !PREV_FREE_BIT
        };
        self.set_word_at(chunk, updated);
    }

    fn write_header(
        &mut self,
        chunk: HeapRef,
        size: usize,
        alloc_type: AllocType,
        color: GcColor,
        prev_free: bool,
        in_use: bool,
    ) {
        debug_assert!(size <= SIZE_MASK as usize);
        let mut header = size as u32;
        header |= (alloc_type as u32) << TYPE_SHIFT;
        header |= (color as u32) << COLOR_SHIFT;
        if prev_free {
            header |= PREV_FREE_BIT;
        }
        if in_use {
            header |= IN_USE_BIT;
        }
        self.set_word_at(chunk, header);
    }

    /// Free chunks keep their own start offset in their last word so the
    /// following chunk can find them in O(1) while coalescing.
    fn write_tail_backptr(&mut self, chunk: HeapRef, size: usize) {
        self.set_word_at(chunk + size - 4, chunk as u32);
    }

    fn read_prev_backptr(&self, chunk: HeapRef) -> HeapRef {
        self.word_at(chunk - 4) as HeapRef
    }

    // -- free list -----------------------------------------------------------

    fn free_next(&self, chunk: HeapRef) -> u32 {
        self.word_at(chunk + HEADER_SIZE)
    }

    fn free_prev(&self, chunk: HeapRef) -> u32 {
        self.word_at(chunk + HEADER_SIZE + 4)
    }

    fn set_free_links(&mut self, chunk: HeapRef, next: u32, prev: u32) {
        self.set_word_at(chunk + HEADER_SIZE, next);
        self.set_word_at(chunk + HEADER_SIZE + 4, prev);
    }

    fn unlink_free(&mut self, chunk: HeapRef) {
        let next = self.free_next(chunk);
        let prev = self.free_prev(chunk);
        if prev == 0 {
            self.free_head = next;
        } else {
            self.set_word_at(prev as usize + HEADER_SIZE, next);
        }
        if next != 0 {
            self.set_word_at(next as usize + HEADER_SIZE + 4, prev);
        }
    }

    fn push_free(&mut self, chunk: HeapRef) {
        let old_head = self.free_head;
        self.set_free_links(chunk, old_head, 0);
        if old_head != 0 {
            self.set_word_at(old_head as usize + HEADER_SIZE + 4, chunk as u32);
        }
        self.free_head = chunk as u32;
    }

    // -- allocation ----------------------------------------------------------

    fn chunk_size_for(user_size: usize) -> usize {
        let padded = (user_size + ALIGN - 1) & !(ALIGN - 1);
        (HEADER_SIZE + padded).max(MIN_CHUNK)
    }

    /// First-fit allocation. Contents are whatever the chunk last held.
    pub fn alloc(&mut self, user_size: usize, alloc_type: AllocType) -> Result<HeapRef, VmError> {
        let needed = Self::chunk_size_for(user_size);
        if needed > SIZE_MASK as usize {
            return Err(VmError::OutOfMemory);
        }

        let mut cursor = self.free_head;
        while cursor != 0 {
            let chunk = cursor as usize;
            let size = self.chunk_size(chunk);
            if size >= needed {
                self.unlink_free(chunk);
                let remainder = size - needed;
                let prev_free = self.is_prev_free(chunk);
                if remainder >= MIN_CHUNK {
                    let rest = chunk + needed;
                    self.write_header(rest, remainder, AllocType::Data, GcColor::White, false, false);
                    self.write_tail_backptr(rest, remainder);
                    self.push_free(rest);
                    self.write_header(chunk, needed, alloc_type, GcColor::White, prev_free, true);
                    // The chunk after the remainder already carries prev_free.
                } else {
                    self.write_header(chunk, size, alloc_type, GcColor::White, prev_free, true);
                    if let Some(next) = self.next_chunk(chunk) {
                        self.set_prev_free(next, false);
                    }
                }
                self.heap_free -= self.chunk_size(chunk);
                return Ok(chunk);
            }
            cursor = self.free_next(chunk);
        }
        Err(VmError::OutOfMemory)
    }

    /// As [`alloc`], zero-filled.
    pub fn calloc(&mut self, user_size: usize, alloc_type: AllocType) -> Result<HeapRef, VmError> {
        let chunk = self.alloc(user_size, alloc_type)?;
        let payload_len = self.chunk_size(chunk) - HEADER_SIZE;
        unsafe {
            std::ptr::write_bytes(self.base.add(chunk + HEADER_SIZE), 0, payload_len);
        }
        Ok(chunk)
    }

    fn check_live_chunk(&self, chunk: HeapRef) -> Result<(), VmError> {
        if chunk < FIRST_CHUNK
            || chunk % ALIGN != 0
            || chunk >= self.capacity
            || !self.is_in_use(chunk)
        {
            return Err(VmError::InvalidChunk(chunk));
        }
        let size = self.chunk_size(chunk);
        if size < MIN_CHUNK || chunk + size > self.capacity {
            return Err(VmError::InvalidChunk(chunk));
        }
        Ok(())
    }

    /// Returns the chunk to the free list, eagerly coalescing with both
    /// adjacent neighbors.
    pub fn free(&mut self, chunk: HeapRef) -> Result<(), VmError> {
        self.check_live_chunk(chunk)?;
        let mut start = chunk;
        let mut size = self.chunk_size(chunk);
        self.heap_free += size;

        if let Some(next) = self.next_chunk(chunk) {
            if !self.is_in_use(next) {
                self.unlink_free(next);
                size += self.chunk_size(next);
            }
        }
        if self.is_prev_free(chunk) {
            let prev = self.read_prev_backptr(chunk);
            self.unlink_free(prev);
            size += self.chunk_size(prev);
            start = prev;
        }

        let prev_free_of_start = if start == chunk {
            false
        } else {
            self.is_prev_free(start)
        };
        self.write_header(start, size, AllocType::Data, GcColor::White, prev_free_of_start, false);
        self.write_tail_backptr(start, size);
        self.push_free(start);
        if start + size < self.capacity {
            self.set_prev_free(start + size, true);
        }
        Ok(())
    }

    /// Allocates a chunk of identical size and type and copies the payload.
    pub fn clone_chunk(&mut self, chunk: HeapRef) -> Result<HeapRef, VmError> {
        self.check_live_chunk(chunk)?;
        let size = self.chunk_size(chunk);
        let alloc_type = self.alloc_type(chunk)?;
        let copy = self.alloc(size - HEADER_SIZE, alloc_type)?;
        unsafe {
            std::ptr::copy_nonoverlapping(
                self.base.add(chunk + HEADER_SIZE),
                self.base.add(copy + HEADER_SIZE),
                size - HEADER_SIZE,
            );
        }
        Ok(copy)
    }

    /// Retypes a chunk in place; used to freeze parked metadata as `Static`.
    pub fn set_alloc_type(&mut self, chunk: HeapRef, alloc_type: AllocType) -> Result<(), VmError> {
        self.check_live_chunk(chunk)?;
        let header = self.header(chunk);
        let cleared = header & !(TYPE_MASK << TYPE_SHIFT);
        self.set_word_at(chunk, cleared | ((alloc_type as u32) << TYPE_SHIFT));
        Ok(())
    }

    fn next_chunk(&self, chunk: HeapRef) -> Option<HeapRef> {
        let next = chunk + self.chunk_size(chunk);
        (next < self.capacity).then_some(next)
    }

    /// Linear walk over every chunk, free and allocated.
    pub fn chunks(&self) -> ChunkIter<'_> {
        ChunkIter {
            heap: self,
            offset: FIRST_CHUNK,
        }
    }

    /// True when the value plausibly names a live allocated chunk; used by
    /// the debugger's `IsCollected` probe, not by the (precise) collector.
    pub fn is_live_object(&self, chunk: HeapRef) -> bool {
        self.check_live_chunk(chunk).is_ok()
    }

    /// Full structural audit of the chunk lattice; test and corruption-probe
    /// hook, O(heap).
    pub fn validate(&self) -> Result<(), VmError> {
        let mut offset = FIRST_CHUNK;
        let mut free_sum = 0usize;
        let mut total = 0usize;
        let mut prev_was_free = false;
        while offset < self.capacity {
            let size = self.chunk_size(offset);
            if size < MIN_CHUNK || offset + size > self.capacity {
                return Err(VmError::HeapCorrupt("chunk size out of bounds"));
            }
            if self.is_prev_free(offset) != prev_was_free {
                return Err(VmError::HeapCorrupt("prev_free bit out of sync"));
            }
            if self.is_in_use(offset) {
                prev_was_free = false;
            } else {
                if prev_was_free {
                    return Err(VmError::HeapCorrupt("adjacent free chunks"));
                }
                if self.word_at(offset + size - 4) as usize != offset {
                    return Err(VmError::HeapCorrupt("bad trailing back-pointer"));
                }
                free_sum += size;
                prev_was_free = true;
            }
            total += size;
            offset += size;
        }
        if total != self.managed_capacity() {
            return Err(VmError::HeapCorrupt("chunk sizes do not cover the heap"));
        }
        if free_sum != self.heap_free {
            return Err(VmError::HeapCorrupt("free accounting mismatch"));
        }
        Ok(())
    }

    // -- typed payload access ------------------------------------------------

    unsafe fn payload_ptr(&self, chunk: HeapRef) -> *mut u8 {
        unsafe { self.base.add(chunk + HEADER_SIZE) }
    }

    pub fn get_class_id(&self, chunk: HeapRef) -> Result<ClassId, VmError> {
        let raw = unsafe { *(self.payload_ptr(chunk) as *const u32) };
        ClassId::from_u32(raw).ok_or(VmError::InvalidChunk(chunk))
    }

    pub fn is_array(&self, chunk: HeapRef) -> Result<bool, VmError> {
        Ok(self.alloc_type(chunk)?.is_array_shaped())
    }

    pub fn alloc_instance(
        &mut self,
        class_id: ClassId,
        instance_size: usize,
        alloc_type: AllocType,
    ) -> Result<HeapRef, VmError> {
        let chunk = self.calloc(Self::OBJ_FIELDS_OFFSET + instance_size, alloc_type)?;
        unsafe {
            *(self.payload_ptr(chunk) as *mut u32) = class_id.as_u32();
        }
        Ok(chunk)
    }

    fn alloc_array_raw(
        &mut self,
        class_id: ClassId,
        length: i32,
        element: AllocationType,
        alloc_type: AllocType,
    ) -> Result<HeapRef, VmError> {
        debug_assert!(length >= 0);
        let data_size = Self::ARRAY_ELEMENTS_OFFSET + length as usize * element.byte_size();
        let chunk = self.calloc(data_size, alloc_type)?;
        unsafe {
            let p = self.payload_ptr(chunk);
            *(p as *mut u32) = class_id.as_u32();
            *(p.add(Self::ARRAY_LENGTH_OFFSET) as *mut i32) = length;
            *p.add(Self::ARRAY_KIND_OFFSET) = element as u8;
        }
        Ok(chunk)
    }

    pub fn alloc_primitive_array(
        &mut self,
        class_id: ClassId,
        element: AllocationType,
        length: i32,
    ) -> Result<HeapRef, VmError> {
        debug_assert!(element != AllocationType::Reference);
        self.alloc_array_raw(class_id, length, element, AllocType::ArrayPrimitive)
    }

    pub fn alloc_object_array(
        &mut self,
        class_id: ClassId,
        length: i32,
    ) -> Result<HeapRef, VmError> {
        self.alloc_array_raw(class_id, length, AllocationType::Reference, AllocType::ArrayObject)
    }

    pub fn get_array_length(&self, chunk: HeapRef) -> Result<i32, VmError> {
        if !self.is_array(chunk)? {
            return Err(VmError::UnexpectedType("not an array"));
        }
        Ok(unsafe { *(self.payload_ptr(chunk).add(Self::ARRAY_LENGTH_OFFSET) as *const i32) })
    }

    pub fn get_array_element_kind(&self, chunk: HeapRef) -> Result<AllocationType, VmError> {
        if !self.is_array(chunk)? {
            return Err(VmError::UnexpectedType("not an array"));
        }
        let raw = unsafe { *self.payload_ptr(chunk).add(Self::ARRAY_KIND_OFFSET) };
        AllocationType::try_from(raw).map_err(|_| VmError::HeapCorrupt("bad array element kind"))
    }

    pub fn read_array_element(&self, chunk: HeapRef, index: i32) -> Result<Value, VmError> {
        let length = self.get_array_length(chunk)?;
        if index < 0 || index >= length {
            throw_index_out_of_bounds(index, length)?;
        }
        let kind = self.get_array_element_kind(chunk)?;
        let offset = Self::ARRAY_ELEMENTS_OFFSET + index as usize * kind.byte_size();
        self.read_field(chunk, offset, kind)
    }

    pub fn write_array_element(
        &mut self,
        chunk: HeapRef,
        index: i32,
        value: Value,
    ) -> Result<(), VmError> {
        let length = self.get_array_length(chunk)?;
        if index < 0 || index >= length {
            throw_index_out_of_bounds(index, length)?;
        }
        let kind = self.get_array_element_kind(chunk)?;
        let offset = Self::ARRAY_ELEMENTS_OFFSET + index as usize * kind.byte_size();
        self.write_field(chunk, offset, value, kind)
    }

    pub fn read_field(
        &self,
        chunk: HeapRef,
        offset: usize,
        kind: AllocationType,
    ) -> Result<Value, VmError> {
        let p = unsafe { self.payload_ptr(chunk).add(offset) };
        let value = match kind {
            AllocationType::Boolean => {
                Value::Integer(unsafe { *p } as i32 & 1)
            }
            AllocationType::Byte => Value::Integer(unsafe { *(p as *const i8) } as i32),
            AllocationType::Char => Value::Integer(unsafe { *(p as *const u16) } as i32),
            AllocationType::Short => Value::Integer(unsafe { *(p as *const i16) } as i32),
            AllocationType::Int => Value::Integer(unsafe { *(p as *const i32) }),
            AllocationType::Long => Value::Long(unsafe { *(p as *const i64) }),
            AllocationType::Float => Value::Float(unsafe { *(p as *const f32) }),
            AllocationType::Double => Value::Double(unsafe { *(p as *const f64) }),
            AllocationType::Reference => {
                let target = unsafe { *(p as *const usize) };
                if target == NULL_REF {
                    Value::Null
                } else {
                    Value::Ref(target)
                }
            }
        };
        Ok(value)
    }

    pub fn write_field(
        &mut self,
        chunk: HeapRef,
        offset: usize,
        value: Value,
        kind: AllocationType,
    ) -> Result<(), VmError> {
        let p = unsafe { self.payload_ptr(chunk).add(offset) };
        match (value, kind) {
            (Value::Integer(v), AllocationType::Boolean) => unsafe { *p = (v != 0) as u8 },
            (Value::Integer(v), AllocationType::Byte) => unsafe { *(p as *mut i8) = v as i8 },
            (Value::Integer(v), AllocationType::Char) => unsafe { *(p as *mut u16) = v as u16 },
            (Value::Integer(v), AllocationType::Short) => unsafe { *(p as *mut i16) = v as i16 },
            (Value::Integer(v), AllocationType::Int) => unsafe { *(p as *mut i32) = v },
            (Value::Long(v), AllocationType::Long) => unsafe { *(p as *mut i64) = v },
            (Value::Float(v), AllocationType::Float) => unsafe { *(p as *mut f32) = v },
            (Value::Double(v), AllocationType::Double) => unsafe { *(p as *mut f64) = v },
            (Value::Ref(r), AllocationType::Reference) => unsafe { *(p as *mut usize) = r },
            (Value::Null, AllocationType::Reference) => unsafe { *(p as *mut usize) = NULL_REF },
            _ => return Err(VmError::UnexpectedType("field/value kind mismatch")),
        }
        Ok(())
    }

    /// Raw reference slot read used by the collector; no null mapping.
    pub(crate) fn read_ref_slot(&self, chunk: HeapRef, offset: usize) -> HeapRef {
        unsafe { *(self.payload_ptr(chunk).add(offset) as *const usize) }
    }

    pub(crate) fn write_ref_slot(&mut self, chunk: HeapRef, offset: usize, value: HeapRef) {
        unsafe { *(self.payload_ptr(chunk).add(offset) as *mut usize) = value }
    }

    pub fn copy_array_region(
        &mut self,
        src: HeapRef,
        src_pos: i32,
        dest: HeapRef,
        dest_pos: i32,
        length: i32,
    ) -> Result<(), VmError> {
        let src_kind = self.get_array_element_kind(src)?;
        let dest_kind = self.get_array_element_kind(dest)?;
        if src_kind != dest_kind {
            return crate::throw_exception!(ArrayStoreException, "mismatched array types");
        }
        let src_len = self.get_array_length(src)?;
        let dest_len = self.get_array_length(dest)?;
        if src_pos < 0
            || dest_pos < 0
            || length < 0
            || src_pos.checked_add(length).is_none_or(|end| end > src_len)
            || dest_pos.checked_add(length).is_none_or(|end| end > dest_len)
        {
            return crate::throw_exception!(
                ArrayIndexOutOfBoundsException,
                "arraycopy range out of bounds"
            );
        }
        let elem = src_kind.byte_size();
        unsafe {
            let src_ptr = self
                .payload_ptr(src)
                .add(Self::ARRAY_ELEMENTS_OFFSET + src_pos as usize * elem);
            let dest_ptr = self
                .payload_ptr(dest)
                .add(Self::ARRAY_ELEMENTS_OFFSET + dest_pos as usize * elem);
            std::ptr::copy(src_ptr, dest_ptr, length as usize * elem);
        }
        Ok(())
    }

    // -- strings -------------------------------------------------------------

    pub fn char_array_slice(&self, chunk: HeapRef) -> Result<&[u16], VmError> {
        let kind = self.get_array_element_kind(chunk)?;
        if kind != AllocationType::Char {
            return Err(VmError::UnexpectedType("not a char array"));
        }
        let length = self.get_array_length(chunk)? as usize;
        let p = unsafe { self.payload_ptr(chunk).add(Self::ARRAY_ELEMENTS_OFFSET) };
        Ok(unsafe { std::slice::from_raw_parts(p as *const u16, length) })
    }

    pub fn byte_array_slice(&self, chunk: HeapRef) -> Result<&[i8], VmError> {
        let kind = self.get_array_element_kind(chunk)?;
        if kind != AllocationType::Byte {
            return Err(VmError::UnexpectedType("not a byte array"));
        }
        let length = self.get_array_length(chunk)? as usize;
        let p = unsafe { self.payload_ptr(chunk).add(Self::ARRAY_ELEMENTS_OFFSET) };
        Ok(unsafe { std::slice::from_raw_parts(p as *const i8, length) })
    }

    /// Builds a String object (plus its char storage) from host UTF-8.
    /// `pooled` marks the char storage with the intern-pool alloc type.
    pub fn alloc_string(&mut self, s: &str, pooled: bool) -> Result<HeapRef, VmError> {
        let units: Vec<u16> = s.encode_utf16().collect();
        let support = self.string_support()?;
        let (string_class, char_class, instance_size, value_offset) = (
            support.string_class_id,
            support.char_array_class_id,
            support.instance_size,
            support.value_offset,
        );
        let storage_type = if pooled {
            AllocType::String
        } else {
            AllocType::ArrayPrimitive
        };
        let chars = self.alloc_array_raw(
            char_class,
            units.len() as i32,
            AllocationType::Char,
            storage_type,
        )?;
        unsafe {
            let p = self.payload_ptr(chars).add(Self::ARRAY_ELEMENTS_OFFSET) as *mut u16;
            std::ptr::copy_nonoverlapping(units.as_ptr(), p, units.len());
        }
        let string = self.alloc_instance(string_class, instance_size, AllocType::Object)?;
        self.write_field(string, value_offset, Value::Ref(chars), AllocationType::Reference)?;
        Ok(string)
    }

    /// `String.intern` identity: one String object per UTF symbol, created
    /// lazily on first request.
    pub fn intern_string(&mut self, sym: Symbol) -> Result<HeapRef, VmError> {
        if let Some(existing) = self.string_pool.get(&sym) {
            return Ok(*existing);
        }
        let interner = self.interner.clone();
        let created = self.alloc_string(interner.resolve(&sym), true)?;
        self.string_pool.insert(sym, created);
        Ok(created)
    }

    pub fn lookup_interned(&self, sym: Symbol) -> Option<HeapRef> {
        self.string_pool.get(&sym).copied()
    }

    pub fn interned_strings(&self) -> impl Iterator<Item = HeapRef> + '_ {
        self.string_pool.values().copied()
    }

    /// Reads a Java string back into host UTF-8.
    pub fn read_string(&self, string: HeapRef) -> Result<String, VmError> {
        let support = self.string_support()?;
        let value = self.read_field(string, support.value_offset, AllocationType::Reference)?;
        match value {
            Value::Ref(chars) => Ok(String::from_utf16_lossy(self.char_array_slice(chars)?)),
            Value::Null => Ok(String::new()),
            _ => Err(VmError::UnexpectedType("String.value is not a reference")),
        }
    }
}

fn throw_index_out_of_bounds(index: i32, length: i32) -> Result<(), VmError> {
    crate::throw_exception!(
        ArrayIndexOutOfBoundsException,
        "Index {} out of bounds for length {}",
        index,
        length
    )
}

pub struct ChunkIter<'a> {
    heap: &'a Heap,
    offset: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct ChunkInfo {
    pub offset: HeapRef,
    pub size: usize,
    pub in_use: bool,
}

impl Iterator for ChunkIter<'_> {
    type Item = ChunkInfo;

    fn next(&mut self) -> Option<ChunkInfo> {
        if self.offset >= self.heap.capacity {
            return None;
        }
        let offset = self.offset;
        let size = self.heap.chunk_size(offset);
        if size < MIN_CHUNK {
            // A zero or undersized header would loop forever; stop the walk
            // and let validate() report the corruption.
            self.offset = self.heap.capacity;
            return None;
        }
        self.offset += size;
        Some(ChunkInfo {
            offset,
            size,
            in_use: self.heap.is_in_use(offset),
        })
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.base as *mut libc::c_void, self.capacity);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_heap() -> Heap {
        Heap::new(64 * 1024, Arc::new(ThreadedRodeo::default())).unwrap()
    }

    #[test]
    fn fresh_heap_is_one_free_chunk() {
        let heap = test_heap();
        heap.validate().unwrap();
        assert_eq!(heap.free_bytes(), heap.managed_capacity());
        assert_eq!(heap.chunks().count(), 1);
    }

    #[test]
    fn min_chunk_allocation_succeeds() {
        let mut heap = test_heap();
        let r = heap.alloc(1, AllocType::Data).unwrap();
        assert_eq!(r % ALIGN, 0);
        heap.validate().unwrap();
        assert_eq!(
            heap.free_bytes(),
            heap.managed_capacity() - MIN_CHUNK
        );
    }

    #[test]
    fn whole_heap_allocation_succeeds_once_then_fails() {
        let mut heap = test_heap();
        let all = heap.largest_possible_alloc();
        let r = heap.alloc(all, AllocType::Data).unwrap();
        assert!(matches!(
            heap.alloc(1, AllocType::Data),
            Err(VmError::OutOfMemory)
        ));
        heap.free(r).unwrap();
        heap.validate().unwrap();
        assert_eq!(heap.free_bytes(), heap.managed_capacity());
        // And over-asking by any amount fails outright.
        assert!(matches!(
            heap.alloc(all + 1, AllocType::Data),
            Err(VmError::OutOfMemory)
        ));
    }

    #[test]
    fn free_coalesces_with_both_neighbors() {
        let mut heap = test_heap();
        let a = heap.alloc(64, AllocType::Data).unwrap();
        let b = heap.alloc(64, AllocType::Data).unwrap();
        let c = heap.alloc(64, AllocType::Data).unwrap();
        let _guard = heap.alloc(64, AllocType::Data).unwrap();

        heap.free(a).unwrap();
        heap.free(c).unwrap();
        heap.validate().unwrap();
        // a | used b | c | guard | big-rest: freeing b must merge a..c.
        heap.free(b).unwrap();
        heap.validate().unwrap();
        let free_chunks = heap.chunks().filter(|ci| !ci.in_use).count();
        assert_eq!(free_chunks, 2); // merged a+b+c, plus the big tail
    }

    #[test]
    fn interleaved_alloc_free_keeps_accounting_exact() {
        let mut heap = test_heap();
        let mut live = Vec::new();
        for round in 0..50usize {
            let size = 8 + (round * 37) % 400;
            live.push(heap.alloc(size, AllocType::Data).unwrap());
            if round % 3 == 0 {
                let victim = live.remove(live.len() / 2);
                heap.free(victim).unwrap();
            }
            heap.validate().unwrap();
        }
        for chunk in live {
            heap.free(chunk).unwrap();
        }
        heap.validate().unwrap();
        assert_eq!(heap.free_bytes(), heap.managed_capacity());
    }

    #[test]
    fn freeing_garbage_pointer_is_an_invalid_chunk() {
        let mut heap = test_heap();
        assert!(matches!(heap.free(12345), Err(VmError::InvalidChunk(_))));
        assert!(matches!(heap.free(0), Err(VmError::InvalidChunk(_))));
        let r = heap.alloc(8, AllocType::Data).unwrap();
        heap.free(r).unwrap();
        // Double free: chunk is no longer in use.
        assert!(matches!(heap.free(r), Err(VmError::InvalidChunk(_))));
    }

    #[test]
    fn clone_copies_payload_and_type() {
        let mut heap = test_heap();
        let class = ClassId::from_usize(7);
        let array = heap
            .alloc_primitive_array(class, AllocationType::Int, 4)
            .unwrap();
        for i in 0..4 {
            heap.write_array_element(array, i, Value::Integer(i * 11)).unwrap();
        }
        let copy = heap.clone_chunk(array).unwrap();
        assert_eq!(heap.alloc_type(copy).unwrap(), AllocType::ArrayPrimitive);
        for i in 0..4 {
            assert_eq!(
                heap.read_array_element(copy, i).unwrap(),
                Value::Integer(i * 11)
            );
        }
    }

    #[test]
    fn set_alloc_type_rewrites_header_in_place() {
        let mut heap = test_heap();
        let r = heap.alloc(16, AllocType::Object).unwrap();
        heap.set_alloc_type(r, AllocType::Static).unwrap();
        assert_eq!(heap.alloc_type(r).unwrap(), AllocType::Static);
    }

    #[test]
    fn array_bounds_are_checked() {
        let mut heap = test_heap();
        let class = ClassId::from_usize(3);
        let array = heap
            .alloc_primitive_array(class, AllocationType::Byte, 2)
            .unwrap();
        assert!(heap.read_array_element(array, 2).is_err());
        assert!(heap.read_array_element(array, -1).is_err());
        assert!(heap
            .write_array_element(array, 5, Value::Integer(1))
            .is_err());
    }
}
