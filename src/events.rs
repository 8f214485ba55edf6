/// Module de diffusion d'événements
///
/// ARCHITECTURE:
/// Un `Broadcaster` notifie de façon synchrone, dans l'ordre
/// d'enregistrement, tous ses auditeurs. Les sources s'en servent pour
/// rafraîchir digests et indicateurs, les digests pour rafraîchir les
/// sources liées, et chaque indicateur pour rafraîchir ses dépendants.
use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::errors::Result;

/// Auditeur d'un broadcaster
///
/// SUBTILITÉ RUST: Rc<dyn Fn> plutôt que Box<dyn FnMut>
/// La liste est clonée avant chaque diffusion (itération sur un
/// instantané), ce qui impose des fermetures partageables; l'état
/// mutable des auditeurs vit derrière leurs propres RefCell.
pub type Listener<A> = Rc<dyn Fn(A) -> Result<()>>;

/// Identifiant d'un enregistrement, rendu par `register`
///
/// Un même auditeur peut être enregistré plusieurs fois; chaque
/// enregistrement reçoit un identifiant distinct et `unregister` n'en
/// retire qu'un.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Diffuseur multicast nommé
pub struct Broadcaster<A> {
    name: &'static str,
    listeners: RefCell<Vec<(ListenerId, Listener<A>)>>,
    next_id: Cell<u64>,
}

impl<A: Copy> Broadcaster<A> {
    pub fn new(name: &'static str) -> Self {
        Broadcaster {
            name,
            listeners: RefCell::new(Vec::new()),
            next_id: Cell::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Nombre d'auditeurs actuellement enregistrés
    pub fn len(&self) -> usize {
        self.listeners.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Enregistre un auditeur et retourne son identifiant
    pub fn register(&self, listener: Listener<A>) -> ListenerId {
        let id = ListenerId(self.next_id.get());
        self.next_id.set(self.next_id.get() + 1);
        self.listeners.borrow_mut().push((id, listener));
        id
    }

    /// Retire l'enregistrement correspondant à l'identifiant
    ///
    /// RETOUR: true si un enregistrement a été retiré
    pub fn unregister(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.borrow_mut();
        match listeners.iter().position(|(lid, _)| *lid == id) {
            Some(position) => {
                listeners.remove(position);
                true
            }
            None => false,
        }
    }

    /// Déclenche l'événement auprès de tous les auditeurs
    ///
    /// ALGORITHME:
    /// 1. Copie la liste des auditeurs (instantané)
    /// 2. Les invoque dans l'ordre d'enregistrement
    /// 3. S'arrête à la première erreur et la propage
    ///
    /// L'instantané rend les register/unregister réentrants inoffensifs:
    /// un auditeur retiré pendant la diffusion est tout de même servi
    /// pour ce tour, un auditeur ajouté ne le sera qu'au tour suivant.
    pub fn trigger(&self, args: A) -> Result<()> {
        let snapshot: Vec<Listener<A>> = self
            .listeners
            .borrow()
            .iter()
            .map(|(_, listener)| Rc::clone(listener))
            .collect();
        for listener in snapshot {
            listener(args)?;
        }
        Ok(())
    }
}

impl<A> std::fmt::Debug for Broadcaster<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broadcaster")
            .field("name", &self.name)
            .field("listeners", &self.listeners.borrow().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::EngineError;

    #[test]
    fn listeners_run_in_registration_order() {
        let event: Broadcaster<u32> = Broadcaster::new("test");
        let seen = Rc::new(RefCell::new(Vec::new()));

        for tag in ["a", "b", "c"] {
            let seen = Rc::clone(&seen);
            event.register(Rc::new(move |value| {
                seen.borrow_mut().push(format!("{tag}{value}"));
                Ok(())
            }));
        }

        event.trigger(1).unwrap();
        assert_eq!(*seen.borrow(), vec!["a1", "b1", "c1"]);
    }

    #[test]
    fn unregister_removes_one_occurrence() {
        let event: Broadcaster<u32> = Broadcaster::new("test");
        let count = Rc::new(Cell::new(0));

        let listener: Listener<u32> = {
            let count = Rc::clone(&count);
            Rc::new(move |_| {
                count.set(count.get() + 1);
                Ok(())
            })
        };
        let first = event.register(Rc::clone(&listener));
        event.register(listener);
        assert_eq!(event.len(), 2);

        assert!(event.unregister(first));
        assert!(!event.unregister(first));
        event.trigger(0).unwrap();
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn reentrant_register_does_not_fire_this_round() {
        let event: Rc<Broadcaster<u32>> = Rc::new(Broadcaster::new("test"));
        let count = Rc::new(Cell::new(0));

        let inner_count = Rc::clone(&count);
        let reentrant = Rc::clone(&event);
        event.register(Rc::new(move |_| {
            let inner_count = Rc::clone(&inner_count);
            reentrant.register(Rc::new(move |_| {
                inner_count.set(inner_count.get() + 1);
                Ok(())
            }));
            Ok(())
        }));

        event.trigger(0).unwrap();
        assert_eq!(count.get(), 0);
        event.trigger(0).unwrap();
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn failing_listener_aborts_the_trigger() {
        let event: Broadcaster<u32> = Broadcaster::new("test");
        let reached = Rc::new(Cell::new(false));

        event.register(Rc::new(|_| {
            Err(EngineError::InvalidArgument("boom".into()))
        }));
        let reached_clone = Rc::clone(&reached);
        event.register(Rc::new(move |_| {
            reached_clone.set(true);
            Ok(())
        }));

        assert!(event.trigger(0).is_err());
        assert!(!reached.get());
    }
}
