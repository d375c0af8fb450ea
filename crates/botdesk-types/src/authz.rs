use uuid::Uuid;

/// The authenticated identity performing an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub user_id: Uuid,
}

impl Actor {
    pub fn new(user_id: Uuid) -> Self {
        Self { user_id }
    }
}

/// The actor does not own the resource it tried to reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("This action is unauthorized.")]
pub struct AuthorizationError;

/// A resource paired with the owner resolved through its ownership chain
/// (knowledge base -> chatbot -> owner, message -> conversation -> chatbot ->
/// owner). The resource can only be taken out through [`authorize`].
#[derive(Debug)]
pub struct Owned<T> {
    owner_id: Uuid,
    resource: T,
}

impl<T> Owned<T> {
    pub fn new(owner_id: Uuid, resource: T) -> Self {
        Self { owner_id, resource }
    }

    pub fn owner_id(&self) -> Uuid {
        self.owner_id
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Owned<U> {
        Owned {
            owner_id: self.owner_id,
            resource: f(self.resource),
        }
    }
}

/// Release `owned` to `actor` if and only if the actor is its owner.
pub fn authorize<T>(actor: &Actor, owned: Owned<T>) -> Result<T, AuthorizationError> {
    if owned.owner_id == actor.user_id {
        Ok(owned.resource)
    } else {
        Err(AuthorizationError)
    }
}
