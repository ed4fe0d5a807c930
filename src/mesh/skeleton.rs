//! Skeleton and physics body descriptions shared between meshes
//!
//! Meshes hold these behind `Arc` and never mutate them in place.

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

/// Persistent bone identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BoneName {
    pub id: u32,
}

impl BoneName {
    pub const fn new(id: u32) -> Self {
        Self { id }
    }
}

/// Bone hierarchy
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Skeleton {
    bone_ids: Vec<BoneName>,
    /// Parent bone index, -1 for roots
    bone_parents: Vec<i16>,
}

impl Skeleton {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a bone and return its index
    pub fn add_bone(&mut self, bone: BoneName, parent: Option<usize>) -> usize {
        if let Some(parent) = parent {
            assert!(parent < self.bone_ids.len(), "Parent bone must be added first");
        }
        self.bone_ids.push(bone);
        self.bone_parents.push(parent.map(|p| p as i16).unwrap_or(-1));
        self.bone_ids.len() - 1
    }

    pub fn bone_count(&self) -> usize {
        self.bone_ids.len()
    }

    pub fn bone_name(&self, index: usize) -> BoneName {
        self.bone_ids[index]
    }

    pub fn bone_parent(&self, index: usize) -> Option<usize> {
        let parent = self.bone_parents[index];
        (parent >= 0).then_some(parent as usize)
    }

    pub fn find_bone(&self, bone: BoneName) -> Option<usize> {
        self.bone_ids.iter().position(|b| *b == bone)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SphereBody {
    pub center: Vec3,
    pub radius: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoxBody {
    pub center: Vec3,
    pub orientation: Quat,
    pub size: Vec3,
}

/// Collision shapes attached to one bone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BodyAggregate {
    pub bone: BoneName,
    pub spheres: Vec<SphereBody>,
    pub boxes: Vec<BoxBody>,
}

/// Physics asset of a mesh
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhysicsBody {
    pub custom_id: i32,
    pub bodies: Vec<BodyAggregate>,
}

impl PhysicsBody {
    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skeleton_hierarchy() {
        let mut skeleton = Skeleton::new();
        let root = skeleton.add_bone(BoneName::new(10), None);
        let child = skeleton.add_bone(BoneName::new(11), Some(root));
        assert_eq!(skeleton.bone_count(), 2);
        assert_eq!(skeleton.bone_parent(child), Some(root));
        assert_eq!(skeleton.bone_parent(root), None);
        assert_eq!(skeleton.find_bone(BoneName::new(11)), Some(child));
        assert_eq!(skeleton.find_bone(BoneName::new(12)), None);
    }
}
