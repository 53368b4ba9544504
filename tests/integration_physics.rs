//! End-to-end simulation behavior: description round-trips, settling,
//! sleeping, continuous detection, kinematics, and shape lifecycle.

use alice_dynamics::prelude::*;

fn simulation() -> Simulation<DefaultNarrowPhaseCallbacks, GravityCallbacks> {
    Simulation::new(
        ShapeCatalog::new(),
        DefaultNarrowPhaseCallbacks::default(),
        GravityCallbacks::default(),
        SolveDescription::new(1, 8),
    )
}

fn add_ground(simulation: &mut Simulation<DefaultNarrowPhaseCallbacks, GravityCallbacks>) {
    let slab = simulation.shapes.add_box(BoxShape::new(100.0, 2.0, 100.0));
    simulation
        .add_static(&StaticDescription::new(
            RigidPose::at(Vec3::new(0.0, -1.0, 0.0)),
            slab,
        ))
        .unwrap();
}

#[test]
fn body_description_round_trips_exactly() {
    let mut simulation = simulation();
    let shape = simulation.shapes.add_sphere(Sphere::new(0.3));

    let mut collidable = CollidableDescription::new(shape);
    collidable.continuity = ContinuousDetection::continuous(1e-3, 1e-4);
    collidable.minimum_speculative_margin = 0.01;
    collidable.maximum_speculative_margin = 1.5;
    let description = BodyDescription {
        pose: RigidPose::new(
            Vec3::new(1.0, 2.0, 3.0),
            Quat::from_axis_angle(Vec3::UNIT_Z, 0.4),
        ),
        velocity: BodyVelocity {
            linear: Vec3::new(-1.0, 0.5, 0.25),
            angular: Vec3::new(0.1, -0.2, 0.3),
        },
        local_inertia: BodyInertia::from_mass_and_inertia(2.5, Sphere::new(0.3).inertia_tensor(2.5)),
        collidable,
        activity: BodyActivityDescription {
            sleep_threshold: 0.002,
            minimum_timesteps_under_threshold: 16,
        },
    };

    let handle = simulation.add_body(&description).unwrap();
    assert_eq!(
        simulation.body_description(handle).unwrap(),
        description,
        "Every field survives the round trip"
    );

    let mut changed = description;
    changed.pose.position = Vec3::new(9.0, 9.0, 9.0);
    changed.activity.sleep_threshold = -1.0;
    simulation.apply_body_description(handle, &changed).unwrap();
    assert_eq!(simulation.body_description(handle).unwrap(), changed);
}

#[test]
fn static_description_round_trips_exactly() {
    let mut simulation = simulation();
    let shape = simulation.shapes.add_box(BoxShape::new(2.0, 2.0, 2.0));
    let mut description = StaticDescription::new(
        RigidPose::new(
            Vec3::new(0.0, -3.0, 4.0),
            Quat::from_axis_angle(Vec3::UNIT_X, 0.7),
        ),
        shape,
    );
    description.continuity = ContinuousDetection::passive();

    let handle = simulation.add_static(&description).unwrap();
    assert_eq!(simulation.static_description(handle).unwrap(), description);
}

#[test]
fn unit_box_drop_converges_to_rest() {
    let mut simulation = simulation();
    // Thin floor centered at the origin, top face at y = 0.5
    let floor = simulation.shapes.add_box(BoxShape::new(100.0, 1.0, 100.0));
    simulation
        .add_static(&StaticDescription::new(RigidPose::at(Vec3::ZERO), floor))
        .unwrap();
    let cube = simulation.shapes.add_box(BoxShape::new(1.0, 1.0, 1.0));
    let body = simulation
        .add_body(&BodyDescription::create_dynamic(
            RigidPose::at(Vec3::new(0.0, 5.0, 0.0)),
            BodyInertia::from_mass_and_inertia(
                1.0,
                BoxShape::new(1.0, 1.0, 1.0).inertia_tensor(1.0),
            ),
            CollidableDescription::new(cube),
            BodyActivityDescription::default(),
        ))
        .unwrap();

    for _ in 0..300 {
        simulation.timestep(1.0 / 60.0).unwrap();
    }

    let description = simulation.body_description(body).unwrap();
    assert!(
        (description.pose.position.y - 1.0).abs() < 0.05,
        "Unit box rests half its height above the floor top, y={}",
        description.pose.position.y
    );
    assert!(
        description.velocity.linear.length() < 0.1,
        "Converged to rest, |v|={}",
        description.velocity.linear.length()
    );
}

#[test]
fn distant_bodies_generate_no_constraints() {
    let mut simulation = simulation();
    let sphere = simulation.shapes.add_sphere(Sphere::new(0.5));
    let inertia = BodyInertia::from_mass_and_inertia(1.0, Sphere::new(0.5).inertia_tensor(1.0));
    for i in 0..8 {
        simulation
            .add_body(&BodyDescription::create_dynamic(
                RigidPose::at(Vec3::new(i as f32 * 20.0, 0.0, 0.0)),
                inertia,
                CollidableDescription::new(sphere),
                BodyActivityDescription::default(),
            ))
            .unwrap();
    }
    simulation.timestep(1.0 / 60.0).unwrap();
    assert_eq!(
        simulation.contact_constraint_count(),
        0,
        "Well-separated bodies never pair up"
    );
}

#[test]
fn touching_bodies_generate_constraints() {
    let mut simulation = simulation();
    let sphere = simulation.shapes.add_sphere(Sphere::new(0.5));
    let inertia = BodyInertia::from_mass_and_inertia(1.0, Sphere::new(0.5).inertia_tensor(1.0));
    for i in 0..2 {
        simulation
            .add_body(&BodyDescription::create_dynamic(
                RigidPose::at(Vec3::new(i as f32 * 0.9, 10.0, 0.0)),
                inertia,
                CollidableDescription::new(sphere),
                BodyActivityDescription::default(),
            ))
            .unwrap();
    }
    simulation.timestep(1.0 / 60.0).unwrap();
    assert_eq!(simulation.contact_constraint_count(), 1);
}

#[test]
fn sleeping_island_preserves_poses_and_wakes_together() {
    let mut simulation = simulation();
    add_ground(&mut simulation);
    let cube = simulation.shapes.add_box(BoxShape::new(1.0, 1.0, 1.0));
    let inertia =
        BodyInertia::from_mass_and_inertia(1.0, BoxShape::new(1.0, 1.0, 1.0).inertia_tensor(1.0));
    let lower = simulation
        .add_body(&BodyDescription::create_dynamic(
            RigidPose::at(Vec3::new(0.0, 0.55, 0.0)),
            inertia,
            CollidableDescription::new(cube),
            BodyActivityDescription::default(),
        ))
        .unwrap();
    let upper = simulation
        .add_body(&BodyDescription::create_dynamic(
            RigidPose::at(Vec3::new(0.0, 1.6, 0.0)),
            inertia,
            CollidableDescription::new(cube),
            BodyActivityDescription::default(),
        ))
        .unwrap();

    let mut slept_at = None;
    for tick in 0..600 {
        simulation.timestep(1.0 / 60.0).unwrap();
        if !simulation.bodies.is_awake(lower).unwrap() {
            slept_at = Some(tick);
            break;
        }
    }
    let slept_at = slept_at.expect("Stack fell asleep within ten seconds");
    assert!(
        !simulation.bodies.is_awake(upper).unwrap(),
        "Stacked boxes sleep as one island"
    );

    let lower_pose = simulation.body_description(lower).unwrap().pose;
    let upper_pose = simulation.body_description(upper).unwrap().pose;
    for _ in 0..60 {
        simulation.timestep(1.0 / 60.0).unwrap();
    }
    assert_eq!(
        simulation.body_description(lower).unwrap().pose,
        lower_pose,
        "Sleeping bodies never move"
    );
    assert_eq!(simulation.body_description(upper).unwrap().pose, upper_pose);

    simulation.awaken(lower);
    assert!(simulation.bodies.is_awake(upper).unwrap(), "Waking one wakes all");
    assert!(slept_at > 30, "Sleep requires sustained rest, slept at tick {}", slept_at);
}

#[test]
fn continuous_bullet_stops_at_thin_wall() {
    let mut simulation = simulation();
    simulation.pose_integrator_callbacks.gravity = Vec3::ZERO;
    let wall = simulation.shapes.add_box(BoxShape::new(0.2, 20.0, 20.0));
    simulation
        .add_static(&StaticDescription::new(
            RigidPose::at(Vec3::new(8.0, 0.0, 0.0)),
            wall,
        ))
        .unwrap();

    let shape = simulation.shapes.add_sphere(Sphere::new(0.1));
    let mut collidable = CollidableDescription::new(shape);
    collidable.continuity = ContinuousDetection::continuous(1e-4, 1e-3);
    let bullet = simulation
        .add_body(&BodyDescription {
            pose: RigidPose::at(Vec3::ZERO),
            velocity: BodyVelocity {
                linear: Vec3::new(200.0, 0.0, 0.0),
                angular: Vec3::ZERO,
            },
            local_inertia: BodyInertia::from_mass_and_inertia(
                0.01,
                Sphere::new(0.1).inertia_tensor(0.01),
            ),
            collidable,
            activity: BodyActivityDescription::default(),
        })
        .unwrap();

    for _ in 0..60 {
        simulation.timestep(1.0 / 60.0).unwrap();
    }
    let x = simulation.body_description(bullet).unwrap().pose.position.x;
    assert!(
        x < 8.0,
        "A 200 unit/s bullet never tunnels a 0.4-thick wall, x={}",
        x
    );
}

#[test]
fn kinematic_body_is_immovable_but_pushes() {
    let mut simulation = simulation();
    simulation.pose_integrator_callbacks.gravity = Vec3::ZERO;
    let sphere = simulation.shapes.add_sphere(Sphere::new(0.5));

    let mut kinematic_description = BodyDescription::create_kinematic(
        RigidPose::at(Vec3::ZERO),
        CollidableDescription::new(sphere),
        BodyActivityDescription {
            // Keep the mover awake for the whole test
            sleep_threshold: -1.0,
            minimum_timesteps_under_threshold: 255,
        },
    );
    kinematic_description.velocity.linear = Vec3::new(1.0, 0.0, 0.0);
    let kinematic = simulation.add_body(&kinematic_description).unwrap();

    let dynamic = simulation
        .add_body(&BodyDescription::create_dynamic(
            RigidPose::at(Vec3::new(1.2, 0.0, 0.0)),
            BodyInertia::from_mass_and_inertia(1.0, Sphere::new(0.5).inertia_tensor(1.0)),
            CollidableDescription::new(sphere),
            BodyActivityDescription::default(),
        ))
        .unwrap();

    for _ in 0..60 {
        simulation.timestep(1.0 / 60.0).unwrap();
    }

    let kinematic_state = simulation.body_description(kinematic).unwrap();
    let dynamic_state = simulation.body_description(dynamic).unwrap();
    assert_eq!(
        kinematic_state.velocity.linear,
        Vec3::new(1.0, 0.0, 0.0),
        "Impulses never touch a kinematic"
    );
    assert!(
        (kinematic_state.pose.position.x - 1.0).abs() < 1e-4,
        "Kinematic advanced by exactly its velocity"
    );
    assert!(
        dynamic_state.velocity.linear.x > 0.9,
        "Dynamic body pushed up to the kinematic's speed, vx={}",
        dynamic_state.velocity.linear.x
    );
}

#[test]
fn compound_body_rests_on_ground() {
    let mut simulation = simulation();
    add_ground(&mut simulation);
    let sphere = simulation.shapes.add_sphere(Sphere::new(0.5));
    let compound = simulation
        .shapes
        .add_compound(vec![
            CompoundChild {
                local_pose: RigidPose::at(Vec3::new(-1.0, 0.0, 0.0)),
                shape: sphere,
            },
            CompoundChild {
                local_pose: RigidPose::at(Vec3::new(1.0, 0.0, 0.0)),
                shape: sphere,
            },
        ])
        .unwrap();
    let inertia = simulation.shapes.compute_inertia(compound, 2.0).unwrap();
    let body = simulation
        .add_body(&BodyDescription::create_dynamic(
            RigidPose::at(Vec3::new(0.0, 2.0, 0.0)),
            BodyInertia::from_mass_and_inertia(2.0, inertia),
            CollidableDescription::new(compound),
            BodyActivityDescription::default(),
        ))
        .unwrap();

    for _ in 0..300 {
        simulation.timestep(1.0 / 60.0).unwrap();
    }
    let description = simulation.body_description(body).unwrap();
    assert!(
        (description.pose.position.y - 0.5).abs() < 0.1,
        "Dumbbell rests on both spheres, y={}",
        description.pose.position.y
    );
}

#[test]
fn recursive_shape_removal_cascades_exactly_once() {
    let mut simulation = simulation();
    let a = simulation.shapes.add_sphere(Sphere::new(0.5));
    let b = simulation.shapes.add_box(BoxShape::new(1.0, 1.0, 1.0));
    let keep = simulation.shapes.add_sphere(Sphere::new(2.0));
    let compound = simulation
        .shapes
        .add_compound(vec![
            CompoundChild {
                local_pose: RigidPose::IDENTITY,
                shape: a,
            },
            CompoundChild {
                local_pose: RigidPose::at(Vec3::new(0.0, 1.0, 0.0)),
                shape: b,
            },
        ])
        .unwrap();
    assert_eq!(simulation.shapes.live_count(), 4);

    simulation.remove_shape_recursively(compound).unwrap();
    assert_eq!(
        simulation.shapes.live_count(),
        1,
        "Compound and its children removed, unrelated shape kept"
    );
    assert!(simulation.shapes.sphere(keep).is_ok());
    assert!(simulation.shapes.sphere(a).is_err());
    assert!(
        simulation.remove_shape(compound).is_err(),
        "Second removal is rejected, not double-freed"
    );
}
