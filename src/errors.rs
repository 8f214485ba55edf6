/// Module des erreurs du moteur de séries temporelles
///
/// Toutes les opérations faillibles du moteur retournent `Result<T>`,
/// un alias sur le type d'erreur unique `EngineError`
use thiserror::Error;

/// Erreur du moteur
///
/// DESIGN: Un seul enum pour tout le moteur, dérivé avec thiserror.
/// Chaque variante correspond à une famille de fautes; le message
/// transporte les valeurs incriminées.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Argument invalide: index incohérent, largeur inattendue, dtype
    /// incompatible, taille de chunk ou de fenêtre trop petite, sources
    /// hétérogènes entre dépendances d'un même indicateur
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Une interpolation est requise mais la série est vide et aucune
    /// valeur initiale n'a été fournie à sa création
    #[error("cannot interpolate: the series is empty and has no initial value")]
    Uninitialized,

    /// Lecture hors du domaine temporel de la série (horodatage
    /// antérieur à l'origine)
    #[error("out of range: {0}")]
    OutOfRange(String),

    /// Utilisation d'un indicateur après dispose()
    #[error("the indicator is disposed and cannot be used anymore")]
    Disposed,

    /// Liaison impossible: le digest visé a un intervalle plus petit ou
    /// une origine antérieure à celle de la source
    #[error("interval mismatch: {0}")]
    IntervalMismatch(String),
}

/// Alias de résultat pour tout le moteur
pub type Result<T> = std::result::Result<T, EngineError>;
