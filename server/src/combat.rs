//! Damage resolution for projectile and environmental hits.
//!
//! [`resolve`] is a pure function from a victim/hit interaction to the
//! victim's new health fraction. Health is stored as a fraction of the
//! player's current effective maximum, so the absolute value is
//! reconstructed, reduced and clamped, then renormalized. The clamp happens
//! on the absolute value before renormalizing; changing that order changes
//! rounding behavior near zero health.

use crate::constants::{
    PLAYERS_HEALTH_MIN, PROJECTILES_EXTRA_SPEED_TO_DAMAGE_FACTOR,
    PROJECTILES_MAX_EXTRA_SPEED_FACTOR, UPGRADES_DEFENSE_FACTOR,
};
use shared::Vector2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlaneType {
    Predator,
    Goliath,
    Copter,
    Tornado,
    Prowler,
}

impl PlaneType {
    /// Health scale relative to the Goliath, which has the largest health
    /// pool: full health = 1 / damage_factor.
    pub fn damage_factor(&self) -> f64 {
        match self {
            PlaneType::Predator => 2.0,
            PlaneType::Goliath => 1.0,
            PlaneType::Copter => 2.1,
            PlaneType::Tornado => 5.0 / 3.0,
            PlaneType::Prowler => 5.0 / 3.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProjectileType {
    PredatorMissile,
    GoliathMissile,
    CopterMissile,
    TornadoSingleMissile,
    TornadoTripleMissile,
    ProwlerMissile,
}

impl ProjectileType {
    pub fn damage(&self) -> f64 {
        match self {
            ProjectileType::PredatorMissile => 0.4,
            ProjectileType::GoliathMissile => 1.2,
            ProjectileType::CopterMissile => 0.2,
            ProjectileType::TornadoSingleMissile => 0.4,
            ProjectileType::TornadoTripleMissile => 0.3,
            ProjectileType::ProwlerMissile => 0.45,
        }
    }

    /// Speed ceiling of an unupgraded projectile of this type.
    pub fn max_speed(&self) -> f64 {
        match self {
            ProjectileType::PredatorMissile => 9.0,
            ProjectileType::GoliathMissile => 6.0,
            ProjectileType::CopterMissile => 9.0,
            ProjectileType::TornadoSingleMissile => 7.0,
            ProjectileType::TornadoTripleMissile => 7.0,
            ProjectileType::ProwlerMissile => 7.0,
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            ProjectileType::PredatorMissile => 1,
            ProjectileType::GoliathMissile => 2,
            ProjectileType::CopterMissile => 3,
            ProjectileType::TornadoSingleMissile => 4,
            ProjectileType::TornadoTripleMissile => 5,
            ProjectileType::ProwlerMissile => 6,
        }
    }
}

/// Victim state needed to resolve a hit.
#[derive(Debug, Clone, Copy)]
pub struct Victim {
    /// Health as a fraction of current effective maximum, in `[MIN, 1]`.
    pub health_fraction: f64,
    pub velocity: Vector2,
    pub shielded: bool,
    pub plane: PlaneType,
    /// Defense upgrade level, indexes the defense factor table.
    pub defense_level: usize,
}

/// The incoming hit: either a projectile or a flat environmental amount.
#[derive(Debug, Clone, Copy)]
pub enum Hit {
    Projectile {
        projectile: ProjectileType,
        velocity: Vector2,
        double_damage: bool,
    },
    Flat(f64),
}

/// Resolves a hit into the victim's new health fraction.
pub fn resolve(victim: &Victim, hit: &Hit) -> f64 {
    if victim.shielded {
        // Shield fully absorbs the hit.
        return victim.health_fraction;
    }

    let damage = match hit {
        Hit::Flat(amount) => *amount,
        Hit::Projectile {
            projectile,
            velocity,
            double_damage,
        } => projectile_damage(*projectile, velocity, *double_damage, &victim.velocity),
    };

    apply_damage(victim, damage)
}

fn projectile_damage(
    projectile: ProjectileType,
    projectile_velocity: &Vector2,
    double_damage: bool,
    victim_velocity: &Vector2,
) -> f64 {
    let speed = projectile_velocity.length();
    let max_speed = projectile.max_speed();

    // Projectile upgrades increase the damage.
    let overspeed_factor =
        1.0 + (speed - max_speed).max(0.0) * PROJECTILES_EXTRA_SPEED_TO_DAMAGE_FACTOR;

    // Damage increases or decreases with the collision speed: the closing
    // component is highest when the victim flies into the shot.
    let max_extra_speed = max_speed * PROJECTILES_MAX_EXTRA_SPEED_FACTOR;
    let closing_component = if speed > 0.0 {
        (-projectile_velocity.dot(victim_velocity) / speed)
            .clamp(-max_extra_speed, max_extra_speed)
    } else {
        0.0
    };
    let closing_factor = 1.0 + closing_component * PROJECTILES_EXTRA_SPEED_TO_DAMAGE_FACTOR;

    let mut damage = projectile.damage() * overspeed_factor * closing_factor;

    if double_damage {
        damage *= 2.0;
    }

    damage
}

fn apply_damage(victim: &Victim, damage: f64) -> f64 {
    let defense_level = victim.defense_level.min(UPGRADES_DEFENSE_FACTOR.len() - 1);
    let full_health =
        (1.0 / victim.plane.damage_factor()) * UPGRADES_DEFENSE_FACTOR[defense_level];

    // Clamp the absolute value before renormalizing; the order is part of
    // the observable behavior near zero health.
    let absolute = (full_health * victim.health_fraction - damage).max(PLAYERS_HEALTH_MIN);

    absolute / full_health
}
