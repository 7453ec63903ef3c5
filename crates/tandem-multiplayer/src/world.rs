//! ECS storage for the host's canonical state.

use bevy_ecs::prelude::*;
use rustc_hash::FxHashMap;
use tandem_net::{EntityId, ParticipantId};

use crate::entity::{Participant, SharedEntity};

/// The host's canonical session state. Wraps a Bevy ECS [`World`] and
/// indexes it by network identifiers.
pub struct AuthoritativeWorld {
    world: World,
    entities: FxHashMap<EntityId, Entity>,
    participants: FxHashMap<ParticipantId, Entity>,
    next_entity: u64,
}

impl AuthoritativeWorld {
    /// Creates an empty world.
    pub fn new() -> Self {
        Self {
            world: World::new(),
            entities: FxHashMap::default(),
            participants: FxHashMap::default(),
            next_entity: 1,
        }
    }

    /// Reserve a fresh entity identifier.
    pub fn allocate_entity_id(&mut self) -> EntityId {
        let id = EntityId(self.next_entity);
        self.next_entity += 1;
        id
    }

    // --- Entities ---

    /// Insert an entity. Replaces any previous entity with the same id.
    pub fn insert_entity(&mut self, state: SharedEntity) {
        let id = state.id;
        let handle = self.world.spawn(state).id();
        if let Some(old) = self.entities.insert(id, handle) {
            self.world.despawn(old);
        }
    }

    /// Looks up an entity.
    pub fn entity(&self, id: EntityId) -> Option<&SharedEntity> {
        self.world.get::<SharedEntity>(*self.entities.get(&id)?)
    }

    /// Mutably looks up an entity.
    pub fn entity_mut(&mut self, id: EntityId) -> Option<Mut<'_, SharedEntity>> {
        self.world.get_mut::<SharedEntity>(*self.entities.get(&id)?)
    }

    /// Removes an entity and returns its final state.
    pub fn remove_entity(&mut self, id: EntityId) -> Option<SharedEntity> {
        let handle = self.entities.remove(&id)?;
        let state = self.world.get::<SharedEntity>(handle).cloned();
        self.world.despawn(handle);
        state
    }

    /// Entity identifiers in ascending order.
    pub fn entity_ids(&self) -> Vec<EntityId> {
        let mut ids: Vec<_> = self.entities.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Number of entities.
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    // --- Participants ---

    /// Insert a participant. Replaces any previous one with the same id.
    pub fn insert_participant(&mut self, participant: Participant) {
        let id = participant.id;
        let handle = self.world.spawn(participant).id();
        if let Some(old) = self.participants.insert(id, handle) {
            self.world.despawn(old);
        }
    }

    /// Looks up a participant.
    pub fn participant(&self, id: ParticipantId) -> Option<&Participant> {
        self.world.get::<Participant>(*self.participants.get(&id)?)
    }

    /// Mutably looks up a participant.
    pub fn participant_mut(&mut self, id: ParticipantId) -> Option<Mut<'_, Participant>> {
        self.world.get_mut::<Participant>(*self.participants.get(&id)?)
    }

    /// Whether `id` is a current participant.
    pub fn has_participant(&self, id: ParticipantId) -> bool {
        self.participants.contains_key(&id)
    }

    /// Removes a participant and returns its final state.
    pub fn remove_participant(&mut self, id: ParticipantId) -> Option<Participant> {
        let handle = self.participants.remove(&id)?;
        let state = self.world.get::<Participant>(handle).cloned();
        self.world.despawn(handle);
        state
    }

    /// Participant identifiers in ascending order.
    pub fn participant_ids(&self) -> Vec<ParticipantId> {
        let mut ids: Vec<_> = self.participants.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Number of participants, including the host's own.
    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    /// Returns a reference to the inner ECS [`World`].
    pub fn world(&self) -> &World {
        &self.world
    }
}

impl Default for AuthoritativeWorld {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_config::EntityConfig;
    use tandem_math::Pose;

    fn entity(world: &mut AuthoritativeWorld) -> EntityId {
        let id = world.allocate_entity_id();
        world.insert_entity(SharedEntity::new(
            id,
            Pose::IDENTITY,
            1.0,
            true,
            EntityConfig::default(),
            0.0,
        ));
        id
    }

    #[test]
    fn test_insert_lookup_remove_entity() {
        let mut world = AuthoritativeWorld::new();
        let a = entity(&mut world);
        let b = entity(&mut world);
        assert_ne!(a, b);
        assert_eq!(world.entity_ids(), vec![a, b]);

        world.entity_mut(a).unwrap().set_scale(1.5);
        assert_eq!(world.entity(a).unwrap().scale(), 1.5);

        let removed = world.remove_entity(a).unwrap();
        assert_eq!(removed.id, a);
        assert!(world.entity(a).is_none());
        assert_eq!(world.entity_count(), 1);
    }

    #[test]
    fn test_participants() {
        let mut world = AuthoritativeWorld::new();
        world.insert_participant(Participant::new(ParticipantId(2), "b", false, Pose::IDENTITY));
        world.insert_participant(Participant::new(ParticipantId(1), "a", true, Pose::IDENTITY));
        assert_eq!(world.participant_ids(), vec![ParticipantId(1), ParticipantId(2)]);
        assert!(world.has_participant(ParticipantId(2)));

        world.participant_mut(ParticipantId(2)).unwrap().held = Some(EntityId(5));
        let gone = world.remove_participant(ParticipantId(2)).unwrap();
        assert_eq!(gone.held, Some(EntityId(5)));
        assert!(!world.has_participant(ParticipantId(2)));
        assert_eq!(world.participant_count(), 1);
    }
}
