//! Size, alignment, and padding of types as laid out for x86-64.
//!
//! Follows the C ABI: scalars are their natural size and alignment, a
//! tuple's alignment is the maximum of its elements, and padding is inserted
//! before any element whose alignment the running offset violates. Layouts
//! are cached by type handle; padding layouts are shared by byte count.

use std::collections::HashMap;

use exp_ir::{Type, TypeId, TypeInterner};

/// Handle to a cached [`Layout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LayoutId(u32);

impl LayoutId {
    const fn index(self) -> usize {
        self.0 as usize
    }
}

/// The laid-out shape of a type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Layout {
    /// A scalar occupying `size` bytes at `align` alignment.
    Scalar {
        /// Size in bytes.
        size: u64,
        /// Alignment in bytes.
        align: u64,
    },
    /// Inter-element padding.
    Padding(u64),
    /// A tuple with padding interleaved.
    Tuple(TupleLayout),
}

/// Tuple layout: elements and paddings in memory order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TupleLayout {
    /// Total size, padding included; the offset one past the last element.
    pub size: u64,
    /// Max element alignment.
    pub align: u64,
    /// Element and padding layouts in memory order.
    pub elements: Vec<LayoutId>,
}

/// Cache of layouts, keyed by type handle.
#[derive(Debug, Default)]
pub struct Layouts {
    layouts: Vec<Layout>,
    by_type: HashMap<TypeId, LayoutId>,
    paddings: HashMap<u64, LayoutId>,
}

impl Layouts {
    /// Layout of `ty`, computing and caching it on first use.
    pub fn layout_of(&mut self, ty: TypeId, types: &TypeInterner) -> LayoutId {
        if let Some(&id) = self.by_type.get(&ty) {
            return id;
        }

        let layout = match types.get(ty) {
            Type::Nil | Type::Bool | Type::I8 | Type::U8 => Layout::Scalar { size: 1, align: 1 },
            Type::I16 | Type::U16 => Layout::Scalar { size: 2, align: 2 },
            Type::I32 | Type::U32 => Layout::Scalar { size: 4, align: 4 },
            Type::I64 | Type::U64 => Layout::Scalar { size: 8, align: 8 },
            Type::Tuple(tuple) => {
                let elements = tuple.elements.clone();
                Layout::Tuple(self.tuple_layout(&elements, types))
            }
            Type::Function(_) => unreachable!("function types are never laid out"),
        };

        let id = self.push(layout);
        self.by_type.insert(ty, id);
        id
    }

    fn tuple_layout(&mut self, element_types: &[TypeId], types: &TypeInterner) -> TupleLayout {
        let mut elements = Vec::new();
        let mut offset = 0u64;
        let mut align = 1u64;

        for &element_ty in element_types {
            let element = self.layout_of(element_ty, types);
            let element_align = self.align(element);
            if offset % element_align != 0 {
                let padding = element_align - offset % element_align;
                elements.push(self.padding(padding));
                offset += padding;
            }

            elements.push(element);
            offset += self.size(element);
            align = align.max(element_align);
        }

        TupleLayout {
            size: offset,
            align,
            elements,
        }
    }

    fn padding(&mut self, bytes: u64) -> LayoutId {
        if let Some(&id) = self.paddings.get(&bytes) {
            return id;
        }
        let id = self.push(Layout::Padding(bytes));
        self.paddings.insert(bytes, id);
        id
    }

    fn push(&mut self, layout: Layout) -> LayoutId {
        let id = LayoutId(u32::try_from(self.layouts.len()).expect("layout cache overflow"));
        self.layouts.push(layout);
        id
    }

    /// Resolve a handle.
    pub fn get(&self, id: LayoutId) -> &Layout {
        &self.layouts[id.index()]
    }

    fn size(&self, id: LayoutId) -> u64 {
        match self.get(id) {
            Layout::Scalar { size, .. } => *size,
            Layout::Padding(bytes) => *bytes,
            Layout::Tuple(tuple) => tuple.size,
        }
    }

    fn align(&self, id: LayoutId) -> u64 {
        match self.get(id) {
            Layout::Scalar { align, .. } => *align,
            Layout::Padding(_) => 1,
            Layout::Tuple(tuple) => tuple.align,
        }
    }

    /// Laid-out size of `ty` in bytes.
    pub fn size_of(&mut self, ty: TypeId, types: &TypeInterner) -> u64 {
        let id = self.layout_of(ty, types);
        self.size(id)
    }

    /// Alignment of `ty` in bytes.
    pub fn align_of(&mut self, ty: TypeId, types: &TypeInterner) -> u64 {
        let id = self.layout_of(ty, types);
        self.align(id)
    }

    /// Byte offset of tuple element `index` within `tuple_ty`, padding
    /// included.
    pub fn offset_of(&mut self, tuple_ty: TypeId, index: usize, types: &TypeInterner) -> i64 {
        let id = self.layout_of(tuple_ty, types);
        let Layout::Tuple(tuple) = self.get(id) else {
            unreachable!("offset_of on a non-tuple layout");
        };

        let mut offset = 0u64;
        let mut element_index = 0usize;
        for &part in &tuple.elements {
            match self.get(part) {
                Layout::Padding(bytes) => offset += bytes,
                _ => {
                    if element_index == index {
                        break;
                    }
                    element_index += 1;
                    offset += self.size(part);
                }
            }
        }

        i64::try_from(offset).expect("tuple offset overflow")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::nil(|t: &TypeInterner| t.nil_type(), 1, 1)]
    #[case::bool_(|t: &TypeInterner| t.bool_type(), 1, 1)]
    #[case::i16_(|t: &TypeInterner| t.i16_type(), 2, 2)]
    #[case::i32_(|t: &TypeInterner| t.i32_type(), 4, 4)]
    #[case::u64_(|t: &TypeInterner| t.u64_type(), 8, 8)]
    fn scalar_sizes(
        #[case] pick: fn(&TypeInterner) -> TypeId,
        #[case] size: u64,
        #[case] align: u64,
    ) {
        let types = TypeInterner::new();
        let mut layouts = Layouts::default();
        let ty = pick(&types);
        assert_eq!(layouts.size_of(ty, &types), size);
        assert_eq!(layouts.align_of(ty, &types), align);
    }

    #[test]
    fn homogeneous_tuple_has_no_padding() {
        let mut types = TypeInterner::new();
        let i32_ty = types.i32_type();
        let tuple = types.tuple_type(vec![i32_ty, i32_ty, i32_ty].into());

        let mut layouts = Layouts::default();
        assert_eq!(layouts.size_of(tuple, &types), 12);
        assert_eq!(layouts.align_of(tuple, &types), 4);
        assert_eq!(layouts.offset_of(tuple, 0, &types), 0);
        assert_eq!(layouts.offset_of(tuple, 1, &types), 4);
        assert_eq!(layouts.offset_of(tuple, 2, &types), 8);
    }

    #[test]
    fn padding_is_inserted_before_misaligned_elements() {
        let mut types = TypeInterner::new();
        let u8_ty = types.u8_type();
        let u32_ty = types.u32_type();
        let tuple = types.tuple_type(vec![u8_ty, u32_ty].into());

        let mut layouts = Layouts::default();
        // u8 at 0, 3 bytes of padding, u32 at 4.
        assert_eq!(layouts.offset_of(tuple, 0, &types), 0);
        assert_eq!(layouts.offset_of(tuple, 1, &types), 4);
        assert_eq!(layouts.size_of(tuple, &types), 8);
        assert_eq!(layouts.align_of(tuple, &types), 4);
    }

    #[test]
    fn padding_layouts_are_shared() {
        let mut types = TypeInterner::new();
        let u8_ty = types.u8_type();
        let u32_ty = types.u32_type();
        let a = types.tuple_type(vec![u8_ty, u32_ty].into());
        let b = types.tuple_type(vec![u8_ty, u32_ty, u8_ty, u32_ty].into());

        let mut layouts = Layouts::default();
        let a_id = layouts.layout_of(a, &types);
        let b_id = layouts.layout_of(b, &types);
        let Layout::Tuple(a_tuple) = layouts.get(a_id).clone() else {
            unreachable!()
        };
        let Layout::Tuple(b_tuple) = layouts.get(b_id) else {
            unreachable!()
        };
        // Both tuples reference the same three-byte padding layout.
        assert_eq!(a_tuple.elements[1], b_tuple.elements[1]);
        assert_eq!(b_tuple.elements[1], b_tuple.elements[4]);
    }

    #[test]
    fn nested_tuple_layouts() {
        let mut types = TypeInterner::new();
        let i32_ty = types.i32_type();
        let inner = types.tuple_type(vec![i32_ty, i32_ty].into());
        let outer = types.tuple_type(vec![i32_ty, inner].into());

        let mut layouts = Layouts::default();
        assert_eq!(layouts.size_of(outer, &types), 12);
        assert_eq!(layouts.offset_of(outer, 1, &types), 4);
    }
}
