use alloc::{string::String, sync::Arc};

use derive_builder::Builder;

use super::hdl::{HandleType, Object};
use crate::{
    error::{Error, Result},
    mem::{is_page_aligned, Permissions, VAddr},
};

/// One loadable segment of a program image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Segment {
    /// Offset of the segment's bytes in the image buffer.
    pub offset: usize,
    pub addr: VAddr,
    pub size: u32,
}

impl Segment {
    #[inline]
    pub fn new(offset: usize, addr: VAddr, size: u32) -> Self {
        Segment { offset, addr, size }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// The guest range of the segment, or `None` if it wraps around.
    #[inline]
    pub fn range(&self) -> Option<core::ops::Range<VAddr>> {
        self.addr.checked_add(self.size).map(|end| self.addr..end)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    Code,
    RoData,
    Data,
}

impl SegmentKind {
    pub const ALL: [SegmentKind; 3] = [Self::Code, Self::RoData, Self::Data];

    /// The permissions the segment is mapped with.
    pub fn perms(self) -> Permissions {
        match self {
            SegmentKind::Code => Permissions::READ_EXECUTE,
            SegmentKind::RoData => Permissions::READ,
            SegmentKind::Data => Permissions::READ_WRITE,
        }
    }
}

/// A loaded program image, ready to be mapped into a process.
///
/// Built once by the loader and never modified afterwards.
#[derive(Debug, Builder)]
#[builder(no_std, pattern = "owned", build_fn(private, name = "build_unchecked"))]
pub struct CodeSet {
    #[builder(setter(into))]
    name: String,
    #[builder(default)]
    program_id: u64,
    memory: Arc<[u8]>,
    #[builder(default)]
    code: Segment,
    #[builder(default)]
    rodata: Segment,
    #[builder(default)]
    data: Segment,
    entrypoint: VAddr,
}

impl CodeSetBuilder {
    /// Build the code set, checking that every segment is page aligned, lies
    /// inside the image buffer and does not overlap its siblings.
    pub fn build(self) -> Result<CodeSet> {
        let codeset = self.build_unchecked().map_err(|err| {
            log::warn!("codeset: {:?}", err);
            Error::INVALID_ARGUMENT
        })?;
        codeset.validate()?;
        Ok(codeset)
    }
}

impl CodeSet {
    #[inline]
    pub fn builder() -> CodeSetBuilder {
        CodeSetBuilder::default()
    }

    fn validate(&self) -> Result {
        let mut ranges = [None, None, None];
        for ((kind, seg), slot) in self.segments().zip(ranges.iter_mut()) {
            if !is_page_aligned(seg.addr) {
                return Err(Error::INVALID_ADDRESS);
            }
            if !is_page_aligned(seg.size) {
                return Err(Error::INVALID_SIZE);
            }
            let range = seg.range().ok_or(Error::INVALID_ADDRESS)?;
            let in_image = seg
                .offset
                .checked_add(seg.size as usize)
                .map_or(false, |end| end <= self.memory.len());
            if !in_image {
                log::warn!("codeset {}: {:?} segment out of the image", self.name, kind);
                return Err(Error::INVALID_ARGUMENT);
            }
            if !seg.is_empty() {
                *slot = Some(range);
            }
        }

        let ranges = ranges.iter().flatten();
        for (i, a) in ranges.clone().enumerate() {
            if ranges.clone().skip(i + 1).any(|b| a.start < b.end && b.start < a.end) {
                return Err(Error::INVALID_ADDRESS);
            }
        }
        Ok(())
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn program_id(&self) -> u64 {
        self.program_id
    }

    #[inline]
    pub fn memory(&self) -> &Arc<[u8]> {
        &self.memory
    }

    #[inline]
    pub fn entrypoint(&self) -> VAddr {
        self.entrypoint
    }

    pub fn segment(&self, kind: SegmentKind) -> &Segment {
        match kind {
            SegmentKind::Code => &self.code,
            SegmentKind::RoData => &self.rodata,
            SegmentKind::Data => &self.data,
        }
    }

    /// Every segment with its kind, in load order.
    pub fn segments(&self) -> impl Iterator<Item = (SegmentKind, &Segment)> + Clone + '_ {
        SegmentKind::ALL
            .into_iter()
            .map(move |kind| (kind, self.segment(kind)))
    }
}

impl Object for CodeSet {
    fn handle_type(&self) -> HandleType {
        HandleType::CodeSet
    }

    fn type_name(&self) -> &'static str {
        "CodeSet"
    }

    fn name(&self) -> &str {
        &self.name
    }
}
