//! Face-mesh landmark vocabulary.
//!
//! The analyzers consume the 468-point face-mesh topology: every index has a
//! fixed anatomical meaning. `left`/`right` below refer to the side of the
//! unmirrored image (the subject's right eye is the image-left eye).
//!
//! [`canonical_face`] builds a synthetic, perfectly left/right-symmetric face
//! on that topology. It plays the role of a mean shape: a known-good input for
//! tests, demos and calibration of the description thresholds.

use crate::types::{BoundingBox, Landmark, LandmarkSet, Point, MESH_POINT_COUNT};

/// Named landmark indices used by ratio metrics and guide lines.
pub mod idx {
    // Midline
    pub const FOREHEAD_TOP: usize = 10;
    pub const GLABELLA: usize = 9;
    pub const NOSE_ROOT: usize = 168;
    pub const NOSE_TIP: usize = 4;
    /// Base of the nose where it meets the upper lip.
    pub const NOSE_BASE: usize = 2;
    pub const CHIN: usize = 152;

    // Eyebrows
    pub const LEFT_BROW_INNER: usize = 107;
    pub const LEFT_BROW_OUTER: usize = 70;
    pub const LEFT_BROW_PEAK: usize = 105;
    pub const RIGHT_BROW_INNER: usize = 336;
    pub const RIGHT_BROW_OUTER: usize = 300;
    pub const RIGHT_BROW_PEAK: usize = 334;

    // Eyes
    pub const LEFT_EYE_OUTER: usize = 33;
    pub const LEFT_EYE_INNER: usize = 133;
    pub const LEFT_EYE_TOP: usize = 159;
    pub const LEFT_EYE_BOTTOM: usize = 145;
    pub const RIGHT_EYE_OUTER: usize = 263;
    pub const RIGHT_EYE_INNER: usize = 362;
    pub const RIGHT_EYE_TOP: usize = 386;
    pub const RIGHT_EYE_BOTTOM: usize = 374;

    // Face outline
    pub const LEFT_FACE_BORDER: usize = 234;
    pub const RIGHT_FACE_BORDER: usize = 454;
    pub const LEFT_JAW: usize = 172;
    pub const RIGHT_JAW: usize = 397;

    // Nose wings
    pub const LEFT_NOSE_WING: usize = 129;
    pub const RIGHT_NOSE_WING: usize = 358;
}

/// Left/right mirror partners for every bilateral landmark this crate uses.
pub const MIRROR_PAIRS: &[(usize, usize)] = &[
    // eyebrows
    (70, 300), (63, 293), (105, 334), (66, 296), (107, 336),
    (46, 276), (53, 283), (52, 282), (65, 295),
    // eyes
    (33, 263), (133, 362), (159, 386), (145, 374),
    // upper lids
    (27, 257), (28, 258), (29, 259), (30, 260), (56, 286),
    (222, 442), (223, 443), (224, 444), (225, 445),
    // under eyes
    (228, 448), (229, 449), (230, 450), (231, 451), (232, 452), (233, 453),
    (111, 340), (117, 346), (118, 347), (119, 348), (120, 349),
    // eye tails
    (130, 359), (226, 446), (35, 265), (143, 372), (156, 383), (124, 353),
    // temples and upper forehead
    (54, 284), (21, 251), (71, 301), (162, 389),
    (104, 333), (68, 298), (103, 332),
    (108, 337), (69, 299), (67, 297),
    // jaw
    (172, 397), (136, 365), (150, 379), (149, 378), (176, 400),
    // nose, glabella, forehead, mouth, outline
    (129, 358), (98, 327), (55, 285), (193, 417), (109, 338), (61, 291), (234, 454),
];

/// Mirror partner of a bilateral landmark, if it is one this crate knows.
pub fn mirror_index(index: usize) -> Option<usize> {
    MIRROR_PAIRS.iter().find_map(|&(l, r)| {
        if l == index {
            Some(r)
        } else if r == index {
            Some(l)
        } else {
            None
        }
    })
}

/// Normalized [0,1] positions of the image-left and midline anchors of the
/// canonical face. Right-side anchors are mirrored from [`MIRROR_PAIRS`].
const CANONICAL_ANCHORS: &[(usize, f32, f32)] = &[
    // midline
    (10, 0.50, 0.05), (151, 0.50, 0.14), (9, 0.50, 0.29), (8, 0.50, 0.33),
    (168, 0.50, 0.40), (6, 0.50, 0.46), (197, 0.50, 0.52), (195, 0.50, 0.56),
    (5, 0.50, 0.60), (4, 0.50, 0.64), (1, 0.50, 0.65), (19, 0.50, 0.67),
    (94, 0.50, 0.685), (2, 0.50, 0.69), (0, 0.50, 0.74), (13, 0.50, 0.76),
    (17, 0.50, 0.83), (152, 0.50, 0.98),
    // left eyebrow
    (70, 0.17, 0.34), (63, 0.22, 0.32), (105, 0.28, 0.31), (66, 0.34, 0.315), (107, 0.42, 0.33),
    (46, 0.18, 0.355), (53, 0.23, 0.34), (52, 0.29, 0.335), (65, 0.35, 0.34),
    // left eye
    (33, 0.22, 0.42), (133, 0.40, 0.42), (159, 0.31, 0.39), (145, 0.31, 0.45),
    // left upper lid
    (27, 0.31, 0.375), (28, 0.36, 0.38), (29, 0.26, 0.38), (30, 0.22, 0.39), (56, 0.40, 0.38),
    (222, 0.32, 0.36), (223, 0.28, 0.36), (224, 0.24, 0.365), (225, 0.20, 0.37),
    // left under eye
    (228, 0.26, 0.47), (229, 0.30, 0.475), (230, 0.34, 0.47), (231, 0.37, 0.465),
    (232, 0.39, 0.46), (233, 0.41, 0.45), (111, 0.20, 0.49), (117, 0.24, 0.51),
    (118, 0.29, 0.52), (119, 0.34, 0.515), (120, 0.38, 0.50),
    // left eye tail
    (130, 0.20, 0.42), (226, 0.19, 0.415), (35, 0.18, 0.43), (143, 0.15, 0.43),
    (156, 0.17, 0.40), (124, 0.14, 0.40),
    // left temple and upper forehead
    (54, 0.12, 0.18), (21, 0.07, 0.27), (71, 0.13, 0.28), (162, 0.06, 0.35),
    (104, 0.20, 0.24), (68, 0.16, 0.26), (103, 0.19, 0.17),
    (108, 0.33, 0.20), (69, 0.28, 0.22), (67, 0.27, 0.13),
    // left jaw
    (172, 0.12, 0.75), (136, 0.17, 0.82), (150, 0.22, 0.87), (149, 0.28, 0.91), (176, 0.36, 0.95),
    // left nose, glabella, forehead, mouth, outline
    (129, 0.41, 0.62), (98, 0.43, 0.64), (55, 0.45, 0.35), (193, 0.46, 0.38),
    (109, 0.42, 0.07), (61, 0.36, 0.76), (234, 0.05, 0.50),
];

/// Relative depth of the canonical face at a normalized position.
///
/// A shallow bowl around the nose tip with a protruding nose ridge, deepest
/// (closest to the camera) at the tip. Symmetric about `nx = 0.5`.
fn canonical_depth(nx: f32, ny: f32) -> f32 {
    let dx = (nx - 0.5) * 2.0;
    let dy = (ny - 0.64) * 2.0;
    let nose_dx = nx - 0.5;
    let nose_dy = ny - 0.64;
    let nose = (-(nose_dx * nose_dx / 0.004 + nose_dy * nose_dy / 0.03)).exp();
    0.25 * dx * dx + 0.05 * dy * dy - 0.12 * nose
}

/// Normalized positions for all 468 indices of the canonical face.
fn canonical_positions() -> Vec<(f32, f32)> {
    let mut positions: Vec<Option<(f32, f32)>> = vec![None; MESH_POINT_COUNT];
    for &(i, nx, ny) in CANONICAL_ANCHORS {
        positions[i] = Some((nx, ny));
    }
    for &(left, right) in MIRROR_PAIRS {
        if let Some((nx, ny)) = positions[left] {
            positions[right] = Some((1.0 - nx, ny));
        }
    }

    // Remaining indices fill the face oval in a sunflower pattern.
    let unassigned: Vec<usize> = (0..MESH_POINT_COUNT)
        .filter(|&i| positions[i].is_none())
        .collect();
    let n = unassigned.len() as f32;
    for (k, &i) in unassigned.iter().enumerate() {
        let r = ((k as f32 + 0.5) / n).sqrt();
        let theta = k as f32 * 2.399_963;
        positions[i] = Some((0.5 + 0.38 * r * theta.cos(), 0.55 + 0.42 * r * theta.sin()));
    }

    positions
        .into_iter()
        .map(|p| p.unwrap_or((0.5, 0.5)))
        .collect()
}

/// Creates a synthetic 468-point face filling `face_rect`.
///
/// Every bilateral landmark in [`MIRROR_PAIRS`] sits at the exact mirror
/// position (and depth) of its partner around the box's vertical centre line.
pub fn canonical_face(face_rect: BoundingBox) -> LandmarkSet {
    let landmarks = canonical_positions()
        .into_iter()
        .enumerate()
        .map(|(i, (nx, ny))| {
            let p = face_rect.denormalize_point(Point::new(nx, ny));
            Landmark::new(i, p.x, p.y, canonical_depth(nx, ny) * face_rect.width)
        })
        .collect();
    LandmarkSet::new(landmarks, face_rect)
}
