//! The twelve-palace facial region model.
//!
//! Each palace is a named facial region mapped to one landmark group (a
//! midline region) or two mirrored groups (a bilateral region, image-left group
//! first). The standard table is validated at compile time: no landmark may
//! belong to two regions and every index must exist in the 468-point mesh.
//! Custom tables go through the same check at runtime via [`PalaceTable::new`].

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::metrics;
use crate::types::{LandmarkSet, Point, MESH_POINT_COUNT};

/// The twelve palaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PalaceKind {
    /// 命宫, between the eyebrows.
    Life,
    /// 财帛宫, the nose.
    Wealth,
    /// 兄弟宫, the eyebrows.
    Siblings,
    /// 田宅宫, the upper eyelids.
    Property,
    /// 男女宫, below the eyes.
    Children,
    /// 奴仆宫, the sides of the jaw.
    Servants,
    /// 妻妾宫, the outer eye corners.
    Spouse,
    /// 疾厄宫, the root of the nose.
    Health,
    /// 迁移宫, the temples.
    Travel,
    /// 官禄宫, the centre of the forehead.
    Career,
    /// 福德宫, above the eyebrow tails.
    Fortune,
    /// 父母宫, above the eyebrow heads.
    Parents,
}

impl PalaceKind {
    pub const ALL: [PalaceKind; 12] = [
        PalaceKind::Life,
        PalaceKind::Wealth,
        PalaceKind::Siblings,
        PalaceKind::Property,
        PalaceKind::Children,
        PalaceKind::Servants,
        PalaceKind::Spouse,
        PalaceKind::Health,
        PalaceKind::Travel,
        PalaceKind::Career,
        PalaceKind::Fortune,
        PalaceKind::Parents,
    ];

    /// Stable key used in reports.
    pub const fn name(&self) -> &'static str {
        match self {
            PalaceKind::Life => "life",
            PalaceKind::Wealth => "wealth",
            PalaceKind::Siblings => "siblings",
            PalaceKind::Property => "property",
            PalaceKind::Children => "children",
            PalaceKind::Servants => "servants",
            PalaceKind::Spouse => "spouse",
            PalaceKind::Health => "health",
            PalaceKind::Travel => "travel",
            PalaceKind::Career => "career",
            PalaceKind::Fortune => "fortune",
            PalaceKind::Parents => "parents",
        }
    }

    pub const fn chinese_name(&self) -> &'static str {
        match self {
            PalaceKind::Life => "命宫",
            PalaceKind::Wealth => "财帛宫",
            PalaceKind::Siblings => "兄弟宫",
            PalaceKind::Property => "田宅宫",
            PalaceKind::Children => "男女宫",
            PalaceKind::Servants => "奴仆宫",
            PalaceKind::Spouse => "妻妾宫",
            PalaceKind::Health => "疾厄宫",
            PalaceKind::Travel => "迁移宫",
            PalaceKind::Career => "官禄宫",
            PalaceKind::Fortune => "福德宫",
            PalaceKind::Parents => "父母宫",
        }
    }
}

impl std::fmt::Display for PalaceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One palace and its landmark groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PalaceRegion {
    pub kind: PalaceKind,
    /// One group for midline regions, two mirrored groups for bilateral ones.
    pub groups: &'static [&'static [usize]],
}

impl PalaceRegion {
    pub const fn new(kind: PalaceKind, groups: &'static [&'static [usize]]) -> Self {
        Self { kind, groups }
    }

    pub fn is_bilateral(&self) -> bool {
        self.groups.len() == 2
    }

    pub fn indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.groups.iter().flat_map(|g| g.iter().copied())
    }

    /// Centroid over every resolvable point of the region.
    pub fn centroid(&self, set: &LandmarkSet) -> Option<Point> {
        let indices: Vec<usize> = self.indices().collect();
        metrics::centroid(&set.select(&indices))
    }

    /// Centroid of each group separately (left then right for bilateral regions).
    pub fn group_centroids(&self, set: &LandmarkSet) -> Vec<Option<Point>> {
        self.groups
            .iter()
            .map(|g| metrics::centroid(&set.select(g)))
            .collect()
    }
}

/// First problem found in a region table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableIssue {
    Duplicate {
        index: usize,
        first: PalaceKind,
        second: PalaceKind,
    },
    OutOfRange {
        index: usize,
        palace: PalaceKind,
    },
}

/// Scan a region table for duplicated or out-of-range landmark indices.
pub const fn find_table_issue(regions: &[PalaceRegion]) -> Option<TableIssue> {
    let mut r = 0;
    while r < regions.len() {
        let mut g = 0;
        while g < regions[r].groups.len() {
            let group = regions[r].groups[g];
            let mut i = 0;
            while i < group.len() {
                let index = group[i];
                if index >= MESH_POINT_COUNT {
                    return Some(TableIssue::OutOfRange {
                        index,
                        palace: regions[r].kind,
                    });
                }
                if let Some(first) = first_owner(regions, index, r, g, i) {
                    return Some(TableIssue::Duplicate {
                        index,
                        first,
                        second: regions[r].kind,
                    });
                }
                i += 1;
            }
            g += 1;
        }
        r += 1;
    }
    None
}

/// Region owning `index` at any position before (`region`, `group`, `pos`).
const fn first_owner(
    regions: &[PalaceRegion],
    index: usize,
    region: usize,
    group: usize,
    pos: usize,
) -> Option<PalaceKind> {
    let mut r = 0;
    while r <= region {
        let mut g = 0;
        while g < regions[r].groups.len() {
            let members = regions[r].groups[g];
            let mut i = 0;
            while i < members.len() {
                if r == region && g == group && i == pos {
                    return None;
                }
                if members[i] == index {
                    return Some(regions[r].kind);
                }
                i += 1;
            }
            g += 1;
        }
        r += 1;
    }
    None
}

/// The standard twelve-palace layout on the face mesh.
pub const STANDARD_PALACES: [PalaceRegion; 12] = [
    PalaceRegion::new(PalaceKind::Life, &[&[9, 8, 55, 285, 193, 417]]),
    PalaceRegion::new(
        PalaceKind::Wealth,
        &[&[195, 5, 4, 1, 19, 94, 2, 98, 327, 129, 358]],
    ),
    PalaceRegion::new(
        PalaceKind::Siblings,
        &[
            &[70, 63, 105, 66, 107, 46, 53, 52, 65],
            &[300, 293, 334, 296, 336, 276, 283, 282, 295],
        ],
    ),
    PalaceRegion::new(
        PalaceKind::Property,
        &[
            &[27, 28, 29, 30, 56, 222, 223, 224, 225],
            &[257, 258, 259, 260, 286, 442, 443, 444, 445],
        ],
    ),
    PalaceRegion::new(
        PalaceKind::Children,
        &[
            &[228, 229, 230, 231, 232, 233, 111, 117, 118, 119, 120],
            &[448, 449, 450, 451, 452, 453, 340, 346, 347, 348, 349],
        ],
    ),
    PalaceRegion::new(
        PalaceKind::Servants,
        &[&[172, 136, 150, 149, 176], &[397, 365, 379, 378, 400]],
    ),
    PalaceRegion::new(
        PalaceKind::Spouse,
        &[&[130, 226, 35, 143, 156, 124], &[359, 446, 265, 372, 383, 353]],
    ),
    PalaceRegion::new(PalaceKind::Health, &[&[168, 6, 197]]),
    PalaceRegion::new(
        PalaceKind::Travel,
        &[&[54, 21, 71, 162], &[284, 251, 301, 389]],
    ),
    PalaceRegion::new(PalaceKind::Career, &[&[10, 151, 109, 338]]),
    PalaceRegion::new(PalaceKind::Fortune, &[&[104, 68, 103], &[333, 298, 332]]),
    PalaceRegion::new(PalaceKind::Parents, &[&[108, 69, 67], &[337, 299, 297]]),
];

const _: () = assert!(
    find_table_issue(&STANDARD_PALACES).is_none(),
    "standard palace table has duplicated or out-of-range landmark indices"
);

/// A validated set of palace regions.
#[derive(Debug, Clone)]
pub struct PalaceTable {
    regions: Vec<PalaceRegion>,
}

impl PalaceTable {
    /// Validate and wrap a custom region table.
    pub fn new(regions: Vec<PalaceRegion>) -> Result<Self> {
        match find_table_issue(&regions) {
            None => Ok(Self { regions }),
            Some(TableIssue::Duplicate {
                index,
                first,
                second,
            }) => Err(Error::DuplicatePalaceIndex {
                index,
                first: first.name(),
                second: second.name(),
            }),
            Some(TableIssue::OutOfRange { index, palace }) => Err(Error::PalaceIndexOutOfRange {
                index,
                palace: palace.name(),
            }),
        }
    }

    /// The standard table, checked when the crate is compiled.
    pub fn standard() -> Self {
        Self {
            regions: STANDARD_PALACES.to_vec(),
        }
    }

    pub fn regions(&self) -> &[PalaceRegion] {
        &self.regions
    }

    pub fn region(&self, kind: PalaceKind) -> Option<&PalaceRegion> {
        self.regions.iter().find(|r| r.kind == kind)
    }

    /// Centroid of every palace that resolves at least one point.
    pub fn centroids(&self, set: &LandmarkSet) -> Vec<(PalaceKind, Point)> {
        self.regions
            .iter()
            .filter_map(|r| r.centroid(set).map(|c| (r.kind, c)))
            .collect()
    }
}

impl Default for PalaceTable {
    fn default() -> Self {
        Self::standard()
    }
}
