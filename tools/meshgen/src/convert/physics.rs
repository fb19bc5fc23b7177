//! Physics bodies of converted meshes

use super::{AnimPhysicsOverride, CompilationContext};
use crate::assets::{AnimInstanceAsset, AssetLibrary, BodySetup, PhysicsAsset, ShapeCommon};
use crate::dedup::add_unique;
use glam::Vec3;
use meshgen_common::{
    BodyShapes, BoneUsageFlags, BoxShape, ConvexShape, PhysicsBody, RuntimeMesh, SphereShape,
    SphylShape, TaperedCapsuleShape, pack_shape_flags,
};
use tracing::warn;

fn flags(common: &ShapeCommon) -> u32 {
    pack_shape_flags(common.collision as u8, common.contribute_to_mass)
}

/// Copy every shape of a body setup
pub fn convert_body_setup(setup: &BodySetup) -> BodyShapes {
    BodyShapes {
        bone: setup.bone.clone(),
        spheres: setup
            .spheres
            .iter()
            .map(|s| SphereShape {
                name: s.common.name.clone(),
                center: s.center,
                radius: s.radius,
                flags: flags(&s.common),
            })
            .collect(),
        boxes: setup
            .boxes
            .iter()
            .map(|b| BoxShape {
                name: b.common.name.clone(),
                center: b.center,
                rotation: b.rotation,
                size: Vec3::new(b.x, b.y, b.z),
                flags: flags(&b.common),
            })
            .collect(),
        convexes: setup
            .convexes
            .iter()
            .map(|c| ConvexShape {
                name: c.common.name.clone(),
                vertices: c.vertices.clone(),
                indices: c.indices.clone(),
                transform: c.transform.to_mat4(),
                flags: flags(&c.common),
            })
            .collect(),
        sphyls: setup
            .sphyls
            .iter()
            .map(|s| SphylShape {
                name: s.common.name.clone(),
                center: s.center,
                rotation: s.rotation,
                radius: s.radius,
                length: s.length,
                flags: flags(&s.common),
            })
            .collect(),
        tapered_capsules: setup
            .tapered_capsules
            .iter()
            .map(|t| TaperedCapsuleShape {
                name: t.common.name.clone(),
                center: t.center,
                rotation: t.rotation,
                radius0: t.radius0,
                radius1: t.radius1,
                length: t.length,
                flags: flags(&t.common),
            })
            .collect(),
    }
}

/// Bodies of `asset` whose bone is posed in `mesh`
fn relevant_bodies(asset: &PhysicsAsset, mesh: &RuntimeMesh) -> PhysicsBody {
    PhysicsBody {
        custom_id: None,
        bodies: asset
            .bodies
            .iter()
            .filter(|setup| mesh.find_bone_pose(&setup.bone).is_some())
            .map(convert_body_setup)
            .collect(),
    }
}

/// Attach the mesh's own physics asset, marking its bones as physics bones
pub(super) fn merge_physics_asset(ctx: &mut CompilationContext, asset: &PhysicsAsset, mesh: &mut RuntimeMesh) {
    let body = relevant_bodies(asset, mesh);
    for shapes in &body.bodies {
        if let Some(pose) = mesh.find_bone_pose(&shapes.bone) {
            mesh.bone_poses[pose].usage |= BoneUsageFlags::PHYSICS;
        }
    }

    if !body.bodies.is_empty() {
        let index = add_unique(&mut ctx.physics_assets, asset.name.clone());
        mesh.add_tag_unique(format!("__PA:{index}"));
    }
    mesh.physics = Some(body);
}

/// Add one body per physics asset an animation instance overrides
pub(super) fn add_anim_physics_overrides(
    ctx: &mut CompilationContext,
    assets: &AssetLibrary,
    anim: &AnimInstanceAsset,
    mesh: &mut RuntimeMesh,
) {
    for (property_index, name) in anim.physics_overrides.iter().enumerate() {
        let Some(asset) = assets.physics_asset(name) else {
            warn!(
                "Physics asset [{}] overridden by animation instance [{}] not found",
                name, anim.name
            );
            continue;
        };

        let custom_id = add_unique(
            &mut ctx.anim_physics_overrides,
            AnimPhysicsOverride {
                anim_instance: anim.name.clone(),
                property_index: property_index as u32,
                physics_asset: name.clone(),
            },
        );
        let mut body = relevant_bodies(asset, mesh);
        body.custom_id = Some(custom_id as u32);
        mesh.additional_physics.push(body);
    }
}
