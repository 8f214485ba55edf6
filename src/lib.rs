/// Bibliothèque principale du moteur réactif de séries temporelles
///
/// Cette bibliothèque expose tous les modules nécessaires pour ingérer,
/// agréger et dériver des données de marché: sources à intervalle fixe
/// avec interpolation des trous, digests en bougies plus grossières,
/// sources liées reflétant un digest, et graphe d'indicateurs
/// recalculés incrémentalement
// Déclaration des modules publics
pub mod digest;
pub mod errors;
pub mod events;
pub mod growing_array;
pub mod indicator;
pub mod intervals;
pub mod moving;
pub mod plucking;
pub mod predictor;
pub mod pricing;
pub mod slope;
pub mod source;
pub mod timelapse;
pub mod utils;
